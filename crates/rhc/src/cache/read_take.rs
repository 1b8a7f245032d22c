// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The read/take engine.
//!
//! Both operations walk the non-empty instances (or one explicitly named
//! instance), filter samples through the rejection mask and an optional
//! query-condition bit, synthesize sample info, and maintain read-state and
//! condition triggers as they go. `read` leaves samples in place and marks
//! them READ; `take` unlinks and frees them. Valid samples come out oldest
//! to newest per instance, followed by at most one invalid sample.

use super::conditions::{TriggerInfoCmn, TriggerInfoQc};
use super::instance::{qmask_of_read_state, SampleIx};
use super::{OpEvents, ReaderHistoryCache, RhcState};
use crate::condition::{QueryCondMask, ReadCondition, StateMask};
use crate::error::{Error, Result};
use crate::sample::{InstanceId, SampleData, SampleInfo, SampleState, ViewState};
use std::sync::Arc;

/// How to materialize an output element from a stored sample.
///
/// `valid` distinguishes real samples from the synthesized invalid sample,
/// whose `data` argument is the instance's stored key sample.
type Extract<D, O> = dyn Fn(&Arc<D>, bool) -> O;

impl<D: SampleData> ReaderHistoryCache<D> {
    /// Read up to `max` samples matching the mask (and condition, if any).
    ///
    /// Samples stay in the cache and transition to READ. Results are
    /// deserialized values with synthesized [`SampleInfo`].
    pub fn read(
        &self,
        max: usize,
        mask: StateMask,
        instance: Option<InstanceId>,
        cond: Option<&Arc<ReadCondition<D>>>,
    ) -> Result<Vec<(SampleInfo, D::Value)>> {
        self.read_take_inner(max, mask, instance, cond, false, &value_extract::<D>())
    }

    /// Take up to `max` samples matching the mask (and condition, if any).
    ///
    /// Returned samples are removed from the cache.
    pub fn take(
        &self,
        max: usize,
        mask: StateMask,
        instance: Option<InstanceId>,
        cond: Option<&Arc<ReadCondition<D>>>,
    ) -> Result<Vec<(SampleInfo, D::Value)>> {
        self.read_take_inner(max, mask, instance, cond, true, &value_extract::<D>())
    }

    /// Like [`read`](Self::read) but returns borrowed serialized samples
    /// instead of deserializing into fresh values.
    pub fn read_serialized(
        &self,
        max: usize,
        mask: StateMask,
        instance: Option<InstanceId>,
        cond: Option<&Arc<ReadCondition<D>>>,
    ) -> Result<Vec<(SampleInfo, Arc<D>)>> {
        self.read_take_inner(max, mask, instance, cond, false, &ref_extract::<D>())
    }

    /// Like [`take`](Self::take) but returns borrowed serialized samples.
    pub fn take_serialized(
        &self,
        max: usize,
        mask: StateMask,
        instance: Option<InstanceId>,
        cond: Option<&Arc<ReadCondition<D>>>,
    ) -> Result<Vec<(SampleInfo, Arc<D>)>> {
        self.read_take_inner(max, mask, instance, cond, true, &ref_extract::<D>())
    }

    fn read_take_inner<O>(
        &self,
        max: usize,
        mask: StateMask,
        instance: Option<InstanceId>,
        cond: Option<&Arc<ReadCondition<D>>>,
        take: bool,
        extract: &Extract<D, O>,
    ) -> Result<Vec<(SampleInfo, O)>> {
        if let Some(c) = cond {
            if c.is_query() && c.qcmask() == 0 {
                return Err(Error::ConditionNotAttached);
            }
        }
        let qminv = match cond {
            // A zero mask defers entirely to the condition; otherwise the
            // accepted states are the intersection of both masks.
            Some(c) if mask.bits() == 0 => c.qminv(),
            Some(c) => mask.qminv() | c.qminv(),
            None => mask.qminv(),
        };
        let qcmask = cond
            .and_then(|c| if c.is_query() { Some(c.qcmask()) } else { None })
            .unwrap_or(0);

        let mut events = OpEvents::new();
        let mut out = Vec::new();
        let result = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let result = if max == 0 {
                Ok(())
            } else if let Some(iid) = instance {
                if state.instances.contains_key(&iid) {
                    if take {
                        state.take_inst(iid, max, qminv, qcmask, &mut out, extract, &mut events);
                    } else {
                        state.read_inst(iid, max, qminv, qcmask, &mut out, extract, &mut events);
                    }
                    Ok(())
                } else {
                    Err(Error::PreconditionNotMet)
                }
            } else {
                for iid in state.nonempty_instance_ids() {
                    if out.len() >= max {
                        break;
                    }
                    let room = max - out.len();
                    if take {
                        state.take_inst(iid, room, qminv, qcmask, &mut out, extract, &mut events);
                    } else {
                        state.read_inst(iid, room, qminv, qcmask, &mut out, extract, &mut events);
                    }
                }
                Ok(())
            };
            state.check_counts();
            result
        };
        self.fire_events(events);
        result.map(|()| out)
    }
}

fn value_extract<D: SampleData>() -> impl Fn(&Arc<D>, bool) -> D::Value {
    |data, valid| {
        if valid {
            data.to_value()
        } else {
            data.key_value()
        }
    }
}

fn ref_extract<D: SampleData>() -> impl Fn(&Arc<D>, bool) -> Arc<D> {
    |data, _valid| Arc::clone(data)
}

impl<D: SampleData> RhcState<D> {
    fn make_sample_info(&self, iid: InstanceId, ix: SampleIx) -> SampleInfo {
        let inst = self.inst(iid);
        let s = self.pool.get(ix);
        SampleInfo {
            sample_state: if s.isread {
                SampleState::Read
            } else {
                SampleState::NotRead
            },
            view_state: if inst.isnew {
                ViewState::New
            } else {
                ViewState::NotNew
            },
            instance_state: inst.instance_state(),
            valid_data: true,
            source_timestamp: s.data.source_timestamp(),
            instance_handle: iid,
            publication_handle: s.wr_iid,
            disposed_generation_count: s.disposed_gen,
            no_writers_generation_count: s.no_writers_gen,
            sample_rank: 0,     // patched after the set is complete
            generation_rank: 0, // __/
            absolute_generation_rank: (inst.disposed_gen.wrapping_add(inst.no_writers_gen))
                .wrapping_sub(s.disposed_gen.wrapping_add(s.no_writers_gen)),
        }
    }

    fn make_sample_info_invsample(&self, iid: InstanceId) -> SampleInfo {
        let inst = self.inst(iid);
        SampleInfo {
            sample_state: if inst.inv_isread {
                SampleState::Read
            } else {
                SampleState::NotRead
            },
            view_state: if inst.isnew {
                ViewState::New
            } else {
                ViewState::NotNew
            },
            instance_state: inst.instance_state(),
            valid_data: false,
            source_timestamp: inst.tstamp,
            instance_handle: iid,
            publication_handle: inst.wr_iid,
            disposed_generation_count: inst.disposed_gen,
            no_writers_generation_count: inst.no_writers_gen,
            sample_rank: 0,
            generation_rank: 0,
            absolute_generation_rank: 0,
        }
    }

    /// Query conditions that watch a specific sample state need a trigger
    /// adjustment when a sample transitions to READ; others see no change
    /// from a read.
    fn read_sample_update_conditions(
        &self,
        pre: &mut TriggerInfoCmn,
        iid: InstanceId,
        conds: QueryCondMask,
        sample_wasread: bool,
        events: &mut OpEvents<D>,
    ) {
        if self.qconds_samplest == 0 || (conds & self.qconds_samplest) == 0 {
            return;
        }
        let qc = TriggerInfoQc {
            dec_conds_sample: conds,
            inc_conds_sample: conds,
            dec_sample_read: sample_wasread,
            inc_sample_read: true,
            ..Default::default()
        };
        let post = TriggerInfoCmn::of(self.inst(iid));
        self.update_conditions_for(Some(iid), false, pre, &post, &qc, events);
        *pre = post;
    }

    /// Removing a sample: every query condition matching it loses one
    /// potential trigger contribution.
    fn take_sample_update_conditions(
        &self,
        pre: &mut TriggerInfoCmn,
        iid: InstanceId,
        conds: QueryCondMask,
        sample_wasread: bool,
        events: &mut OpEvents<D>,
    ) {
        if self.nqconds == 0 || conds == 0 {
            return;
        }
        let qc = TriggerInfoQc {
            dec_conds_sample: conds,
            dec_sample_read: sample_wasread,
            ..Default::default()
        };
        let post = TriggerInfoCmn::of(self.inst(iid));
        self.update_conditions_for(Some(iid), false, pre, &post, &qc, events);
        *pre = post;
    }

    pub(super) fn read_inst<O>(
        &mut self,
        iid: InstanceId,
        max: usize,
        qminv: u32,
        qcmask: QueryCondMask,
        out: &mut Vec<(SampleInfo, O)>,
        extract: &Extract<D, O>,
        events: &mut OpEvents<D>,
    ) -> usize {
        debug_assert!(max > 0);
        {
            let inst = self.inst(iid);
            if inst.is_empty() || (inst.qmask() & qminv) != 0 {
                return 0;
            }
        }

        let base = out.len();
        let nread_before = self.inst(iid).nread();
        let mut pre = TriggerInfoCmn::of(self.inst(iid));
        let mut n = 0usize;

        // valid samples precede a possible invalid sample
        let latest = self.inst(iid).latest;
        if !latest.is_nil() {
            let first = self.pool.get(latest).next;
            let mut ix = first;
            loop {
                let (isread, conds, next) = {
                    let s = self.pool.get(ix);
                    (s.isread, s.conds, s.next)
                };
                if (qmask_of_read_state(isread) & qminv) == 0
                    && (qcmask == 0 || (conds & qcmask) != 0)
                {
                    let info = self.make_sample_info(iid, ix);
                    let item = extract(&self.pool.get(ix).data, true);
                    out.push((info, item));
                    if !isread {
                        self.read_sample_update_conditions(&mut pre, iid, conds, false, events);
                        self.pool.get_mut(ix).isread = true;
                        self.inst_mut(iid).nvread += 1;
                        self.n_vread += 1;
                    }
                    n += 1;
                }
                ix = next;
                if n >= max || ix == first {
                    break;
                }
            }
        }

        // the invalid sample, if it matches and there is room
        {
            let include = {
                let inst = self.inst(iid);
                inst.inv_exists
                    && n < max
                    && (inst.qmask_of_invsample() & qminv) == 0
                    && (qcmask == 0 || (inst.conds & qcmask) != 0)
            };
            if include {
                let info = self.make_sample_info_invsample(iid);
                let key_sample = Arc::clone(self.inst(iid).key.key_sample());
                out.push((info, extract(&key_sample, false)));
                let (inv_isread, conds) = {
                    let inst = self.inst(iid);
                    (inst.inv_isread, inst.conds)
                };
                if !inv_isread {
                    self.read_sample_update_conditions(&mut pre, iid, conds, false, events);
                    self.inst_mut(iid).inv_isread = true;
                    self.n_invread += 1;
                }
                n += 1;
            }
        }

        let mut inst_became_old = false;
        if n > 0 {
            patch_generations(&mut out[base..]);
            if self.inst(iid).isnew {
                inst_became_old = true;
                self.inst_mut(iid).isnew = false;
                self.n_new -= 1;
            }
        }
        if nread_before != self.inst(iid).nread() || inst_became_old {
            let post = TriggerInfoCmn::of(self.inst(iid));
            self.update_conditions_for(
                Some(iid),
                false,
                &pre,
                &post,
                &TriggerInfoQc::default(),
                events,
            );
        }
        n
    }

    pub(super) fn take_inst<O>(
        &mut self,
        iid: InstanceId,
        max: usize,
        qminv: u32,
        qcmask: QueryCondMask,
        out: &mut Vec<(SampleInfo, O)>,
        extract: &Extract<D, O>,
        events: &mut OpEvents<D>,
    ) -> usize {
        debug_assert!(max > 0);
        {
            let inst = self.inst(iid);
            if inst.is_empty() || (inst.qmask() & qminv) != 0 {
                return 0;
            }
        }

        let base = out.len();
        let mut pre = TriggerInfoCmn::of(self.inst(iid));
        let mut n = 0usize;

        let latest = self.inst(iid).latest;
        if !latest.is_nil() {
            let mut prev = latest;
            let mut ix = self.pool.get(latest).next;
            let mut remaining = self.inst(iid).nvsamples;
            while remaining > 0 {
                remaining -= 1;
                let (isread, conds, next) = {
                    let s = self.pool.get(ix);
                    (s.isread, s.conds, s.next)
                };
                if (qmask_of_read_state(isread) & qminv) != 0
                    || (qcmask != 0 && (conds & qcmask) == 0)
                {
                    prev = ix;
                } else {
                    self.take_sample_update_conditions(&mut pre, iid, conds, isread, events);
                    let info = self.make_sample_info(iid, ix);
                    let item = extract(&self.pool.get(ix).data, true);
                    out.push((info, item));

                    self.n_vsamples -= 1;
                    if isread {
                        self.inst_mut(iid).nvread -= 1;
                        self.n_vread -= 1;
                    }
                    {
                        let inst = self.inst_mut(iid);
                        inst.nvsamples -= 1;
                        if inst.nvsamples == 0 {
                            inst.latest = SampleIx::NIL;
                        } else if inst.latest == ix {
                            inst.latest = prev;
                        }
                    }
                    if !self.inst(iid).latest.is_nil() {
                        self.pool.get_mut(prev).next = next;
                    }
                    self.free_sample(ix);
                    n += 1;
                    if n >= max {
                        break;
                    }
                }
                ix = next;
            }
        }

        {
            let include = {
                let inst = self.inst(iid);
                inst.inv_exists
                    && n < max
                    && (inst.qmask_of_invsample() & qminv) == 0
                    && (qcmask == 0 || (inst.conds & qcmask) != 0)
            };
            if include {
                let (inv_isread, conds) = {
                    let inst = self.inst(iid);
                    (inst.inv_isread, inst.conds)
                };
                self.take_sample_update_conditions(&mut pre, iid, conds, inv_isread, events);
                let info = self.make_sample_info_invsample(iid);
                let key_sample = Arc::clone(self.inst(iid).key.key_sample());
                out.push((info, extract(&key_sample, false)));
                let mut dummy = TriggerInfoQc::default();
                self.inst_clear_invsample(iid, &mut dummy);
                n += 1;
            }
        }

        if n > 0 {
            patch_generations(&mut out[base..]);
            if self.inst(iid).isnew {
                self.inst_mut(iid).isnew = false;
                self.n_new -= 1;
            }
            let post = TriggerInfoCmn::of(self.inst(iid));
            self.update_conditions_for(
                Some(iid),
                false,
                &pre,
                &post,
                &TriggerInfoQc::default(),
                events,
            );
        }

        if self.inst(iid).is_empty() {
            self.account_for_nonempty_to_empty_transition(iid);
        }
        self.check_counts();
        n
    }
}

/// Fill in sample_rank and generation_rank for one instance's run of
/// returned samples, relative to the last (newest) returned one.
fn patch_generations<O>(items: &mut [(SampleInfo, O)]) {
    let Some(last) = items.len().checked_sub(1) else {
        return;
    };
    if last == 0 {
        return;
    }
    let reference = items[last]
        .0
        .disposed_generation_count
        .wrapping_add(items[last].0.no_writers_generation_count);
    debug_assert_eq!(items[last].0.sample_rank, 0);
    for i in 0..last {
        items[i].0.sample_rank = (last - i) as u32;
        items[i].0.generation_rank = reference.wrapping_sub(
            items[i]
                .0
                .disposed_generation_count
                .wrapping_add(items[i].0.no_writers_generation_count),
        );
    }
}
