// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The reader history cache.
//!
//! Sits between the protocol receive path and the application read/take
//! API. `store()` runs the acceptance pipeline (ordering, time-based
//! filter, ownership, content filter), maintains per-instance state
//! machines and writer registrations, enforces history and resource
//! limits, and keeps condition triggers current; `read()`/`take()` (in
//! [`read_take`]) enumerate matching samples with synthesized sample info.
//!
//! # Instance management
//!
//! Instances are created implicitly by write and dispose, unregistered by
//! unregister. Valid samples are added only by writes; invalid samples only
//! by dispose/unregister, and only when there is no sample or the latest
//! one is already read. There is at most one invalid sample per instance,
//! represented by two flag bits; any incoming sample drops it. Instances
//! are destroyed when samples and registrations both reach zero.
//!
//! The set of registrations is a sparse table of (instance, writer) pairs
//! excluding instances with a single live cached writer, so the typical
//! single-writer case stays out of the table entirely.
//!
//! # Concurrency
//!
//! One mutex guards all cache state for the duration of every operation.
//! Condition trigger counters are atomics so waitsets observe them without
//! the lock; listener callbacks and waitset signalling run after the lock
//! is released.

mod conditions;
mod deadline;
mod instance;
mod lifespan;
mod read_take;
mod registrations;

use crate::condition::{Condition, QueryCondMask, ReadCondition, SamplePredicate};
use crate::error::{Error, Result};
use crate::keymap::KeyInstance;
use crate::qos::{ReaderQos, ResourceLimits};
use crate::sample::{
    InstanceId, SampleData, SampleKind, WriterId, WriterInfo,
};
use crate::status::{
    ReaderListener, RequestedDeadlineMissedStatus, SampleLostStatus, SampleRejectedReason,
    SampleRejectedStatus,
};
use crate::time::{Clock, MonotonicClock, Timestamp};
use conditions::{trigger_info_differs, TriggerInfoCmn, TriggerInfoQc};
use deadline::DeadlineQueue;
use instance::{Instance, SampleIx, SampleNode, SamplePool};
use lifespan::LifespanQueue;
use log::trace;
use parking_lot::Mutex;
use registrations::WriterRegistrations;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Outcome of a store against the acceptance pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StoreResult {
    /// Sample (or state change) entered the cache.
    Stored,
    /// Dropped by a filter; not an error.
    Filtered,
    /// Refused due to resource limits; reliable transports retry.
    Rejected,
}

/// Notifications collected under the lock, fired after it drops.
pub(crate) struct OpEvents<D: SampleData> {
    data_available: bool,
    signal: Vec<Arc<ReadCondition<D>>>,
    lost: u32,
    rejected: Option<(SampleRejectedReason, InstanceId)>,
    deadline_missed: Vec<(InstanceId, u32)>,
}

impl<D: SampleData> OpEvents<D> {
    fn new() -> Self {
        Self {
            data_available: false,
            signal: Vec::new(),
            lost: 0,
            rejected: None,
            deadline_missed: Vec::new(),
        }
    }

    pub(crate) fn push_signal(&mut self, cond: &Arc<ReadCondition<D>>) {
        self.signal.push(Arc::clone(cond));
    }
}

/// All mutable cache state, behind the one mutex.
pub(crate) struct RhcState<D: SampleData> {
    instances: HashMap<InstanceId, Instance<D>>,
    pool: SamplePool<D>,
    /// Most recently added non-empty instance; its `nonempty_next` is the
    /// oldest.
    nonempty_latest: Option<InstanceId>,
    registrations: WriterRegistrations,
    conds: Vec<Arc<ReadCondition<D>>>,
    nqconds: u32,
    /// Bits of attached query conditions that depend on sample state.
    qconds_samplest: QueryCondMask,
    content_filter: Option<SamplePredicate<D>>,

    // QoS-derived configuration
    max_instances: usize,
    max_samples: usize,
    max_samples_per_instance: usize,
    minimum_separation: i64,
    by_source_ordering: bool,
    exclusive_ownership: bool,
    reliable: bool,
    history_depth: u32,
    deadline_dur: Option<u64>,
    xchecks: bool,

    // Aggregate counters (empty instances included where noted)
    n_instances: u32,
    n_nonempty_instances: u32,
    n_not_alive_disposed: u32,
    n_not_alive_no_writers: u32,
    n_new: u32,
    n_vsamples: u32,
    n_vread: u32,
    n_invsamples: u32,
    n_invread: u32,

    lifespan: LifespanQueue,
    deadline: DeadlineQueue,
}

/// Per-reader sample cache with DDS read/take semantics.
///
/// Generic over the serialized-sample contract `D`; see [`SampleData`].
///
/// # Example
///
/// ```ignore
/// let rhc = ReaderHistoryCache::new(ReaderQos::default())?;
/// let keymap = KeyMap::new();
///
/// // receive path
/// let key = keymap.instance(&sample);
/// rhc.store(&writer_info, sample, &key);
///
/// // application
/// let batch = rhc.take(16, StateMask::ANY, None, None)?;
/// ```
pub struct ReaderHistoryCache<D: SampleData> {
    state: Mutex<RhcState<D>>,
    listener: Option<Arc<dyn ReaderListener>>,
    clock: Arc<dyn Clock>,
    lost_total: AtomicU32,
    rejected_total: AtomicU32,
    deadline_total: AtomicU32,
}

impl<D: SampleData> ReaderHistoryCache<D> {
    /// Create a cache with the given QoS and no listener.
    pub fn new(qos: ReaderQos) -> Result<Self> {
        Self::with_listener_and_clock(qos, None, Arc::new(MonotonicClock))
    }

    /// Create a cache that notifies the given listener.
    pub fn with_listener(qos: ReaderQos, listener: Arc<dyn ReaderListener>) -> Result<Self> {
        Self::with_listener_and_clock(qos, Some(listener), Arc::new(MonotonicClock))
    }

    /// Full constructor: listener and monotonic clock are injectable.
    pub fn with_listener_and_clock(
        qos: ReaderQos,
        listener: Option<Arc<dyn ReaderListener>>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        qos.validate().map_err(Error::InvalidQos)?;
        let mut state = RhcState {
            instances: HashMap::new(),
            pool: SamplePool::new(),
            nonempty_latest: None,
            registrations: WriterRegistrations::new(),
            conds: Vec::new(),
            nqconds: 0,
            qconds_samplest: 0,
            content_filter: None,
            max_instances: ResourceLimits::UNLIMITED,
            max_samples: ResourceLimits::UNLIMITED,
            max_samples_per_instance: ResourceLimits::UNLIMITED,
            minimum_separation: 0,
            by_source_ordering: false,
            exclusive_ownership: false,
            reliable: false,
            history_depth: 1,
            deadline_dur: None,
            xchecks: cfg!(debug_assertions),
            n_instances: 0,
            n_nonempty_instances: 0,
            n_not_alive_disposed: 0,
            n_not_alive_no_writers: 0,
            n_new: 0,
            n_vsamples: 0,
            n_vread: 0,
            n_invsamples: 0,
            n_invread: 0,
            lifespan: LifespanQueue::new(),
            deadline: DeadlineQueue::new(),
        };
        state.apply_qos(&qos);
        Ok(Self {
            state: Mutex::new(state),
            listener,
            clock,
            lost_total: AtomicU32::new(0),
            rejected_total: AtomicU32::new(0),
            deadline_total: AtomicU32::new(0),
        })
    }

    /// Replace the mutable QoS (resource limits, filters, ordering,
    /// ownership, reliability, history depth).
    pub fn set_qos(&self, qos: &ReaderQos) -> Result<()> {
        qos.validate().map_err(Error::InvalidQos)?;
        self.state.lock().apply_qos(qos);
        Ok(())
    }

    /// Install or clear the per-topic content filter.
    pub fn set_content_filter(&self, filter: Option<SamplePredicate<D>>) {
        self.state.lock().content_filter = filter;
    }

    /// Store a sample arriving from the protocol layer.
    ///
    /// Returns `false` only when a reliable reader rejected the sample on
    /// resource limits — the transport must redeliver. Filter drops are
    /// successful stores (the writer registration still happened).
    pub fn store(&self, wrinfo: &WriterInfo, sample: Arc<D>, key: &Arc<KeyInstance<D>>) -> bool {
        let statusinfo = sample.status_info();
        let has_data = sample.kind() == SampleKind::Data;
        let is_dispose = statusinfo.is_dispose();

        // Nothing but a key: an implicit register, which we don't track.
        if !has_data && statusinfo.is_empty() {
            return true;
        }

        let iid = key.iid();
        let mut events = OpEvents::new();
        let mut qc = TriggerInfoQc::default();
        let mut nda = false;
        let mut stored = StoreResult::Filtered;
        let now_ns = self.clock.now_ns();
        let reliable;

        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            reliable = state.reliable;
            trace!(
                "[rhc] store iid {iid} wr {} si {:x} has_data {has_data}",
                wrinfo.iid,
                statusinfo.bits()
            );

            let mut pre = TriggerInfoCmn::nonmatch();
            let mut run_postprocess = false;

            if !state.instances.contains_key(&iid) {
                if !has_data && !is_dispose {
                    trace!("[rhc] unregister on unknown instance, ignored");
                } else {
                    stored = state.store_new_instance(
                        wrinfo, &sample, key, has_data, &mut qc, &mut nda, &mut events,
                    );
                    run_postprocess = stored == StoreResult::Stored;
                }
            } else if !state.inst_accepts_sample(iid, wrinfo, &sample, has_data) {
                // Rejected samples (and disposes) still register the writer;
                // unregisters *must* be processed. The instance does not go
                // ALIVE or NEW based on a rejected sample.
                trace!("[rhc] instance rejects sample");
                pre = TriggerInfoCmn::of(state.inst(iid));
                if has_data || is_dispose {
                    state.register(iid, wrinfo.iid, wrinfo.auto_dispose, false, &mut nda);
                    if nda {
                        let latest = state.inst(iid).latest;
                        let latest_read = latest.is_nil() || state.pool.get(latest).isread;
                        if latest_read {
                            let was_empty = state.inst(iid).is_empty();
                            state.inst_set_invsample(iid, &mut qc, &mut nda);
                            if was_empty {
                                state.account_for_empty_to_nonempty_transition(iid);
                            }
                        }
                    }
                }
                events.lost += 1;
                run_postprocess = true;
            } else {
                pre = TriggerInfoCmn::of(state.inst(iid));
                if has_data || is_dispose {
                    let (not_alive, old_isdisposed, old_isnew, was_empty) = {
                        let inst = state.inst(iid);
                        (
                            inst.wrcount == 0 || inst.isdisposed,
                            inst.isdisposed,
                            inst.isnew,
                            inst.is_empty(),
                        )
                    };

                    state.register(iid, wrinfo.iid, wrinfo.auto_dispose, true, &mut nda);
                    state.update_viewstate_and_disposedness(
                        iid, has_data, not_alive, is_dispose, &mut nda,
                    );

                    let mut rejected = false;
                    if has_data {
                        if let Err(reason) =
                            state.add_sample(iid, wrinfo, &sample, &mut qc, &mut nda)
                        {
                            stored = StoreResult::Rejected;
                            events.rejected = Some((reason, iid));
                            // Roll the state changes back.
                            let inst = state.inst_mut(iid);
                            inst.isnew = old_isnew;
                            if old_isdisposed {
                                inst.disposed_gen = inst.disposed_gen.wrapping_sub(1);
                            }
                            inst.isdisposed = old_isdisposed;
                            rejected = true;
                        }
                    }

                    if rejected {
                        run_postprocess = false;
                    } else {
                        stored = StoreResult::Stored;
                        let now_disposed = state.inst(iid).isdisposed;
                        if now_disposed && !old_isdisposed {
                            let latest = state.inst(iid).latest;
                            let latest_read = latest.is_nil() || state.pool.get(latest).isread;
                            if latest_read {
                                state.inst_set_invsample(iid, &mut qc, &mut nda);
                            }
                        }
                        state.update_inst_have_wr_iid(iid, wrinfo, sample.source_timestamp());

                        let (has_latest, isdisposed, isnew) = {
                            let inst = state.inst(iid);
                            (!inst.latest.is_nil(), inst.isdisposed, inst.isnew)
                        };
                        if has_latest || (isdisposed && !old_isdisposed) {
                            if was_empty {
                                state.account_for_empty_to_nonempty_transition(iid);
                            } else {
                                add_signed(
                                    &mut state.n_not_alive_disposed,
                                    i32::from(isdisposed) - i32::from(old_isdisposed),
                                );
                            }
                            add_signed(
                                &mut state.n_new,
                                i32::from(isnew) - i32::from(old_isnew),
                            );
                        }
                        run_postprocess = true;
                    }
                } else {
                    // Pure unregister on an accepting instance.
                    run_postprocess = true;
                }
            }

            if run_postprocess {
                let mut post = TriggerInfoCmn::nonmatch();
                if statusinfo.is_unregister() {
                    state.unregister(
                        iid,
                        wrinfo,
                        sample.source_timestamp(),
                        &mut post,
                        &mut qc,
                        &mut nda,
                    );
                } else {
                    post = TriggerInfoCmn::of(state.inst(iid));
                }
                state.postprocess_instance_update(iid, &pre, &post, &qc, &mut events, now_ns);
            }
        }

        events.data_available = nda;
        self.fire_events(events);
        !(reliable && stored == StoreResult::Rejected)
    }

    /// Notification that a writer is gone: remove all its registrations.
    pub fn unregister_writer(&self, wrinfo: &WriterInfo) {
        let mut events = OpEvents::new();
        let mut nda = false;
        let now_ns = self.clock.now_ns();
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            trace!("[rhc] unregister writer {}", wrinfo.iid);
            for iid in state.instance_ids() {
                let registered = {
                    let inst = state.inst(iid);
                    (inst.wr_iid_islive && inst.wr_iid == wrinfo.iid)
                        || state.registrations.contains(iid, wrinfo.iid)
                };
                if registered {
                    let pre = TriggerInfoCmn::of(state.inst(iid));
                    let mut post = TriggerInfoCmn::nonmatch();
                    let mut qc = TriggerInfoQc::default();
                    let tstamp = state.inst(iid).tstamp;
                    state.unregister(iid, wrinfo, tstamp, &mut post, &mut qc, &mut nda);
                    state.postprocess_instance_update(iid, &pre, &post, &qc, &mut events, now_ns);
                }
            }
        }
        events.data_available = nda;
        self.fire_events(events);
    }

    /// Clear the fast-path owner cache for every instance owned by this
    /// writer, so ownership is up for grabs again.
    pub fn relinquish_ownership(&self, wr_iid: WriterId) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        trace!("[rhc] relinquish ownership {wr_iid}");
        for inst in state.instances.values_mut() {
            if inst.wr_iid_islive && inst.wr_iid == wr_iid {
                inst.wr_iid_islive = false;
            }
        }
        state.check_counts();
    }

    /// Attach a condition. Query conditions get a bit from the shared
    /// 64-slot mask space and a rescan initializes their per-sample match
    /// bits and trigger.
    pub fn add_condition(&self, cond: &Arc<ReadCondition<D>>) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if state
            .conds
            .iter()
            .any(|c| c.condition_id() == cond.condition_id())
            || !cond.mark_attached()
        {
            return Err(Error::AlreadyAttached);
        }

        if cond.is_query() {
            let mut avail: QueryCondMask = !0;
            for c in &state.conds {
                avail &= !c.qcmask();
            }
            if avail == 0 {
                cond.mark_detached();
                return Err(Error::ConditionSlotsExhausted);
            }
            // lowest free bit
            cond.set_qcmask(avail & avail.wrapping_neg());
        }

        state.conds.push(Arc::clone(cond));

        let mut trigger: u32 = 0;
        if !cond.is_query() {
            // Not cached in instances or samples: only the non-empty
            // instances matter.
            for iid in state.nonempty_instance_ids() {
                trigger += state.plain_cond_trigger(iid, cond);
            }
        } else {
            if cond_is_sample_state_dependent(cond.sample_states()) {
                state.qconds_samplest |= cond.qcmask();
            }
            state.nqconds += 1;
            trigger = state.rescan_query_condition(cond);
        }

        trace!(
            "[rhc] add condition {:x} qminv {:x} trigger {trigger}",
            cond.condition_id(),
            cond.qminv()
        );
        cond.set_trigger(trigger);
        drop(guard);
        if trigger > 0 {
            cond.signal_waitsets();
        }
        Ok(())
    }

    /// Detach a condition; its bit slot is reusable by later attaches.
    pub fn remove_condition(&self, cond: &Arc<ReadCondition<D>>) -> bool {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(pos) = state
            .conds
            .iter()
            .position(|c| c.condition_id() == cond.condition_id())
        else {
            return false;
        };
        state.conds.remove(pos);
        if cond.is_query() {
            state.nqconds -= 1;
            state.qconds_samplest &= !cond.qcmask();
            cond.set_qcmask(0);
        }
        cond.mark_detached();
        true
    }

    /// Drop samples whose lifespan expired at or before `now_ns`.
    ///
    /// Returns the next expiry time for the caller's timer, if any samples
    /// remain registered.
    pub fn process_expired_samples(&self, now_ns: u64) -> Option<u64> {
        let mut events = OpEvents::new();
        let next = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            loop {
                let expired = {
                    let pool = &state.pool;
                    state.lifespan.pop_expired(now_ns, |ix, serial| {
                        pool.is_current(ix, serial) && pool.get(ix).lifespan_registered
                    })
                };
                match expired {
                    Some(ix) => state.drop_expired_sample(ix, &mut events),
                    None => break,
                }
            }
            let pool = &state.pool;
            state.lifespan.next_expiry(|ix, serial| {
                pool.is_current(ix, serial) && pool.get(ix).lifespan_registered
            })
        };
        self.fire_events(events);
        next
    }

    /// Report instances whose deadline elapsed at or before `now_ns` and
    /// re-arm them. Returns the next due time, if any instance remains
    /// registered.
    pub fn process_missed_deadlines(&self, now_ns: u64) -> Option<u64> {
        let mut events = OpEvents::new();
        let next = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let dur = state.deadline_dur?;
            // Touch each instance at most once per call so we degrade
            // gracefully when the caller can't keep up.
            let mut budget = state.n_instances;
            while budget > 0 {
                budget -= 1;
                let Some((iid, missed)) = state.deadline.pop_due(now_ns, dur) else {
                    break;
                };
                state.inst_mut(iid).wr_iid_islive = false;
                state.deadline.register(iid, now_ns + dur);
                events.deadline_missed.push((iid, missed));
            }
            state.deadline.next_due()
        };
        self.fire_events(events);
        next
    }

    /// Aggregate count of stored samples (valid plus invalid).
    pub fn sample_count(&self) -> usize {
        let state = self.state.lock();
        (state.n_vsamples + state.n_invsamples) as usize
    }

    /// Number of known instances, empty ones included.
    pub fn instance_count(&self) -> usize {
        self.state.lock().n_instances as usize
    }

    fn fire_events(&self, events: OpEvents<D>) {
        for cond in &events.signal {
            cond.signal_waitsets();
        }
        if events.data_available {
            if let Some(listener) = &self.listener {
                listener.on_data_available();
            }
        }
        if events.lost > 0 {
            let total = self.lost_total.fetch_add(events.lost, Ordering::Relaxed) + events.lost;
            if let Some(listener) = &self.listener {
                listener.on_sample_lost(SampleLostStatus {
                    total_count: total,
                    total_count_change: events.lost as i32,
                });
            }
        }
        if let Some((reason, iid)) = events.rejected {
            let total = self.rejected_total.fetch_add(1, Ordering::Relaxed) + 1;
            if let Some(listener) = &self.listener {
                listener.on_sample_rejected(SampleRejectedStatus {
                    total_count: total,
                    total_count_change: 1,
                    last_reason: reason,
                    last_instance_handle: Some(iid),
                });
            }
        }
        for &(iid, missed) in &events.deadline_missed {
            let total = self.deadline_total.fetch_add(missed, Ordering::Relaxed) + missed;
            if let Some(listener) = &self.listener {
                listener.on_requested_deadline_missed(RequestedDeadlineMissedStatus {
                    total_count: total,
                    total_count_change: missed as i32,
                    last_instance_handle: Some(iid),
                });
            }
        }
    }
}

fn add_signed(counter: &mut u32, delta: i32) {
    if delta >= 0 {
        *counter += delta as u32;
    } else {
        *counter -= delta.unsigned_abs();
    }
}

fn cond_is_sample_state_dependent(sample_states: u32) -> bool {
    use crate::condition::StateMask;
    sample_states == StateMask::READ.bits() || sample_states == StateMask::NOT_READ.bits()
}

impl<D: SampleData> RhcState<D> {
    fn apply_qos(&mut self, qos: &ReaderQos) {
        self.max_samples = qos.resource_limits.max_samples;
        self.max_instances = qos.resource_limits.max_instances;
        self.max_samples_per_instance = qos.resource_limits.max_samples_per_instance;
        self.minimum_separation = qos.time_based_filter.separation_ns();
        self.by_source_ordering = qos.destination_order.is_by_source();
        self.exclusive_ownership = qos.ownership.is_exclusive();
        self.reliable = qos.reliability == crate::qos::Reliability::Reliable;
        self.history_depth = qos.history.depth();
        self.deadline_dur = qos.deadline.period_ns();
    }

    /// Instance lookup that must succeed (internal invariant).
    fn inst(&self, iid: InstanceId) -> &Instance<D> {
        match self.instances.get(&iid) {
            Some(inst) => inst,
            None => unreachable!("instance {iid} not in store"),
        }
    }

    fn inst_mut(&mut self, iid: InstanceId) -> &mut Instance<D> {
        match self.instances.get_mut(&iid) {
            Some(inst) => inst,
            None => unreachable!("instance {iid} not in store"),
        }
    }

    fn instance_ids(&self) -> Vec<InstanceId> {
        self.instances.keys().copied().collect()
    }

    /// Non-empty instances in oldest-to-newest insertion order.
    fn nonempty_instance_ids(&self) -> Vec<InstanceId> {
        let mut out = Vec::with_capacity(self.n_nonempty_instances as usize);
        if let Some(latest) = self.nonempty_latest {
            let first = self.inst(latest).nonempty_next;
            let mut iid = first;
            loop {
                out.push(iid);
                iid = self.inst(iid).nonempty_next;
                if iid == first {
                    break;
                }
            }
        }
        out
    }

    fn add_inst_to_nonempty_list(&mut self, iid: InstanceId) {
        match self.nonempty_latest {
            None => {
                let inst = self.inst_mut(iid);
                inst.nonempty_prev = iid;
                inst.nonempty_next = iid;
            }
            Some(latest) => {
                let oldest = self.inst(latest).nonempty_next;
                self.inst_mut(latest).nonempty_next = iid;
                self.inst_mut(oldest).nonempty_prev = iid;
                let inst = self.inst_mut(iid);
                inst.nonempty_prev = latest;
                inst.nonempty_next = oldest;
            }
        }
        self.nonempty_latest = Some(iid);
        self.n_nonempty_instances += 1;
    }

    fn remove_inst_from_nonempty_list(&mut self, iid: InstanceId) {
        debug_assert!(self.inst(iid).is_empty());
        let (prev, next) = {
            let inst = self.inst(iid);
            (inst.nonempty_prev, inst.nonempty_next)
        };
        if next == iid {
            self.nonempty_latest = None;
        } else {
            self.inst_mut(prev).nonempty_next = next;
            self.inst_mut(next).nonempty_prev = prev;
            if self.nonempty_latest == Some(iid) {
                self.nonempty_latest = Some(prev);
            }
        }
        debug_assert!(self.n_nonempty_instances > 0);
        self.n_nonempty_instances -= 1;
    }

    fn update_conditions_for(
        &self,
        iid: Option<InstanceId>,
        called_from_insert: bool,
        pre: &TriggerInfoCmn,
        post: &TriggerInfoCmn,
        qc: &TriggerInfoQc,
        events: &mut OpEvents<D>,
    ) {
        let pair = iid.map(|iid| (self.inst(iid), &self.pool));
        conditions::update_conditions(&self.conds, called_from_insert, pre, post, qc, pair, events);
    }

    // ---- invalid sample handling -------------------------------------

    fn inst_clear_invsample(&mut self, iid: InstanceId, qc: &mut TriggerInfoQc) {
        let (conds, was_read) = {
            let inst = self.inst_mut(iid);
            debug_assert!(inst.inv_exists);
            inst.inv_exists = false;
            (inst.conds, inst.inv_isread)
        };
        debug_assert_eq!(qc.dec_conds_invsample, 0);
        qc.dec_conds_invsample = conds;
        if was_read {
            qc.dec_invsample_read = true;
            self.n_invread -= 1;
        }
        self.n_invsamples -= 1;
    }

    fn inst_clear_invsample_if_exists(&mut self, iid: InstanceId, qc: &mut TriggerInfoQc) {
        if self.inst(iid).inv_exists {
            self.inst_clear_invsample(iid, qc);
        }
    }

    fn inst_set_invsample(&mut self, iid: InstanceId, qc: &mut TriggerInfoQc, nda: &mut bool) {
        let (exists, isread) = {
            let inst = self.inst(iid);
            (inst.inv_exists, inst.inv_isread)
        };
        if exists && !isread {
            // unread state change already pending
            *nda = true;
        } else {
            self.inst_clear_invsample_if_exists(iid, qc);
            let conds = {
                let inst = self.inst_mut(iid);
                inst.inv_exists = true;
                inst.inv_isread = false;
                inst.conds
            };
            debug_assert_eq!(qc.inc_conds_invsample, 0);
            qc.inc_conds_invsample = conds;
            self.n_invsamples += 1;
            *nda = true;
        }
    }

    // ---- acceptance --------------------------------------------------

    fn inst_accepts_sample_by_writer_guid(inst: &Instance<D>, wrinfo: &WriterInfo) -> bool {
        (inst.wr_iid_islive && inst.wr_iid == wrinfo.iid) || wrinfo.guid < inst.wr_guid
    }

    fn inst_accepts_sample(
        &self,
        iid: InstanceId,
        wrinfo: &WriterInfo,
        sample: &Arc<D>,
        has_data: bool,
    ) -> bool {
        let inst = self.inst(iid);
        let ts = sample.source_timestamp();

        if self.by_source_ordering {
            if !ts.is_valid() || !inst.tstamp.is_valid() || inst.tstamp == ts {
                // no usable timestamps or a tie: writer guid decides
                if !Self::inst_accepts_sample_by_writer_guid(inst, wrinfo) {
                    return false;
                }
            } else if ts < inst.tstamp {
                return false;
            }
        }

        if self.minimum_separation > 0 && ts.is_valid() && inst.tstamp.is_valid() {
            match ts.nanos().checked_sub(self.minimum_separation) {
                None => return false,
                Some(adjusted) if adjusted < inst.tstamp.nanos() => return false,
                Some(_) => {}
            }
        }

        if self.exclusive_ownership && inst.wr_iid_islive && inst.wr_iid != wrinfo.iid {
            let strength = wrinfo.ownership_strength;
            if strength < inst.strength {
                return false;
            }
            if strength == inst.strength
                && !Self::inst_accepts_sample_by_writer_guid(inst, wrinfo)
            {
                return false;
            }
        }

        if has_data {
            if let Some(filter) = &self.content_filter {
                if !(filter.as_ref())(&sample.to_value()) {
                    return false;
                }
            }
        }
        true
    }

    // ---- instance updates --------------------------------------------

    fn update_inst_have_wr_iid(&mut self, iid: InstanceId, wrinfo: &WriterInfo, ts: Timestamp) {
        let inst = self.inst_mut(iid);
        inst.tstamp = ts;
        inst.strength = wrinfo.ownership_strength;
        inst.wr_iid = wrinfo.iid;
        inst.wr_guid = wrinfo.guid;
        inst.wr_iid_islive = true;
    }

    fn update_inst_no_wr_iid(&mut self, iid: InstanceId, wrinfo: &WriterInfo, ts: Timestamp) {
        let inst = self.inst_mut(iid);
        inst.tstamp = ts;
        inst.strength = wrinfo.ownership_strength;
        inst.wr_iid_islive = false;
    }

    fn update_viewstate_and_disposedness(
        &mut self,
        iid: InstanceId,
        has_data: bool,
        not_alive: bool,
        is_dispose: bool,
        nda: &mut bool,
    ) {
        // Sample arriving for a NOT_ALIVE instance => view state NEW
        if has_data && not_alive {
            self.inst_mut(iid).isnew = true;
            *nda = true;
        }

        // A write on a disposed instance resurrects it (gen++) unless the
        // write itself disposes again.
        if has_data && self.inst(iid).isdisposed {
            let inst = self.inst_mut(iid);
            inst.disposed_gen = inst.disposed_gen.wrapping_add(1);
            if !is_dispose {
                inst.isdisposed = false;
            }
            *nda = true;
        }
        if is_dispose && !self.inst(iid).isdisposed {
            self.inst_mut(iid).isdisposed = true;
            *nda = true;
        }
    }

    // ---- registration ------------------------------------------------

    fn register(
        &mut self,
        iid: InstanceId,
        wr_iid: WriterId,
        autodispose: bool,
        sample_accepted: bool,
        nda: &mut bool,
    ) {
        let (wrcount, islive, cached_wr, was_empty, isdisposed) = {
            let inst = self.inst(iid);
            (
                inst.wrcount,
                inst.wr_iid_islive,
                inst.wr_iid,
                inst.is_empty(),
                inst.isdisposed,
            )
        };
        let inst_wr_iid = if islive { Some(cached_wr) } else { None };

        if inst_wr_iid == Some(wr_iid) {
            // Same writer as last time: known registered, fast path.
            debug_assert!(wrcount > 0);
        } else if wrcount == 0 {
            debug_assert!(!islive);
            // Registering a writer off a rejected sample must not make
            // inst_accepts_sample treat it as current: set wr_iid but leave
            // wr_iid_islive false in that case.
            let inst = self.inst_mut(iid);
            inst.wr_iid = wr_iid;
            if sample_accepted {
                inst.wr_iid_islive = true;
            }
            inst.wrcount += 1;
            inst.no_writers_gen = inst.no_writers_gen.wrapping_add(1);
            inst.autodispose = autodispose;
            if !was_empty && !isdisposed {
                self.n_not_alive_no_writers -= 1;
            }
            *nda = true;
        } else if inst_wr_iid.is_none() && wrcount == 1 {
            // Someone unregistered the cached writer. If this writer is the
            // one still in the table, restore the fast path; otherwise it
            // is a genuine second registration.
            if self.registrations.add(iid, wr_iid) {
                let inst = self.inst_mut(iid);
                inst.wrcount += 1;
                if autodispose {
                    inst.autodispose = true;
                }
            } else {
                let deleted = self.registrations.delete(iid, wr_iid);
                debug_assert!(deleted);
            }
            if sample_accepted {
                let inst = self.inst_mut(iid);
                inst.wr_iid = wr_iid;
                inst.wr_iid_islive = true;
            }
        } else {
            if wrcount == 1 {
                // Second writer: the cached one moves into the table.
                let added = self.registrations.add(iid, cached_wr);
                debug_assert!(added);
            }
            if self.registrations.add(iid, wr_iid) {
                let inst = self.inst_mut(iid);
                inst.wrcount += 1;
                if autodispose {
                    inst.autodispose = true;
                }
            }
            debug_assert!(self.inst(iid).wrcount >= 2);
            // the most recent writer gets the fast path
            if sample_accepted {
                let inst = self.inst_mut(iid);
                inst.wr_iid = wr_iid;
                inst.wr_iid_islive = true;
            }
        }
    }

    fn unregister_delete_registration(&mut self, iid: InstanceId, wr_iid: WriterId) -> bool {
        let (wrcount, islive, cached_wr) = {
            let inst = self.inst(iid);
            (inst.wrcount, inst.wr_iid_islive, inst.wr_iid)
        };
        if wrcount == 0 {
            false
        } else if wrcount == 1 && islive {
            cached_wr == wr_iid
        } else if !self.registrations.delete(iid, wr_iid) {
            false
        } else {
            // Dropping from 2 to 1 writer with the survivor cached: its
            // table entry must go too (single cached writers stay out of
            // the table).
            if wrcount == 2 && islive && cached_wr != wr_iid {
                self.registrations.delete(iid, cached_wr);
            }
            true
        }
    }

    /// Returns true when the instance lost its last registration while
    /// empty and disposed, i.e. it is ready to be dropped.
    fn unregister_updateinst(
        &mut self,
        iid: InstanceId,
        wrinfo: &WriterInfo,
        tstamp: Timestamp,
        qc: &mut TriggerInfoQc,
        nda: &mut bool,
    ) -> bool {
        {
            let inst = self.inst_mut(iid);
            debug_assert!(inst.wrcount > 0);
            if wrinfo.auto_dispose {
                inst.autodispose = true;
            }
            inst.wrcount -= 1;
        }
        let (wrcount, islive, cached_wr) = {
            let inst = self.inst(iid);
            (inst.wrcount, inst.wr_iid_islive, inst.wr_iid)
        };

        if wrcount > 0 {
            if islive && wrinfo.iid == cached_wr {
                // Next register does real work before the cache is warm
                // again; strength resets so other writers get through.
                let inst = self.inst_mut(iid);
                inst.wr_iid_islive = false;
                inst.strength = 0;
            }
            false
        } else if !self.inst(iid).is_empty() {
            // Keep the content until the application takes it. Surface the
            // not-alive transition through an invalid sample if the latest
            // sample was already read.
            if !self.inst(iid).isdisposed {
                let latest = self.inst(iid).latest;
                let latest_read = latest.is_nil() || self.pool.get(latest).isread;
                if latest_read {
                    self.inst_set_invsample(iid, qc, nda);
                    self.update_inst_no_wr_iid(iid, wrinfo, tstamp);
                }
                if !self.inst(iid).autodispose {
                    self.n_not_alive_no_writers += 1;
                } else {
                    self.inst_mut(iid).isdisposed = true;
                    self.n_not_alive_disposed += 1;
                }
                *nda = true;
            }
            self.inst_mut(iid).wr_iid_islive = false;
            false
        } else if self.inst(iid).isdisposed {
            // No content, no registrations: drop.
            true
        } else {
            // Empty and alive: synthesize the no-writers transition.
            self.inst_set_invsample(iid, qc, nda);
            self.update_inst_no_wr_iid(iid, wrinfo, tstamp);
            if self.inst(iid).autodispose {
                self.inst_mut(iid).isdisposed = true;
            }
            self.account_for_empty_to_nonempty_transition(iid);
            self.inst_mut(iid).wr_iid_islive = false;
            *nda = true;
            false
        }
    }

    fn unregister(
        &mut self,
        iid: InstanceId,
        wrinfo: &WriterInfo,
        tstamp: Timestamp,
        post: &mut TriggerInfoCmn,
        qc: &mut TriggerInfoQc,
        nda: &mut bool,
    ) {
        if !self.unregister_delete_registration(iid, wrinfo.iid) {
            // other registrations remain (or writer was unknown)
            *post = TriggerInfoCmn::of(self.inst(iid));
        } else if self.unregister_updateinst(iid, wrinfo, tstamp, qc, nda) {
            // instance is about to be dropped
            *post = TriggerInfoCmn::nonmatch();
        } else {
            *post = TriggerInfoCmn::of(self.inst(iid));
        }
    }

    // ---- transitions and teardown ------------------------------------

    fn account_for_empty_to_nonempty_transition(&mut self, iid: InstanceId) {
        debug_assert_eq!(self.inst(iid).nsamples(), 1);
        self.add_inst_to_nonempty_list(iid);
        let (isdisposed, wrcount) = {
            let inst = self.inst(iid);
            (inst.isdisposed, inst.wrcount)
        };
        if isdisposed {
            self.n_not_alive_disposed += 1;
        } else if wrcount == 0 {
            self.n_not_alive_no_writers += 1;
        }
    }

    /// Handles a non-empty to empty transition; drops the instance when no
    /// registrations remain. Returns whether the instance was dropped.
    fn account_for_nonempty_to_empty_transition(&mut self, iid: InstanceId) -> bool {
        debug_assert!(self.inst(iid).is_empty());
        self.remove_inst_from_nonempty_list(iid);
        let (isdisposed, wrcount) = {
            let inst = self.inst(iid);
            (inst.isdisposed, inst.wrcount)
        };
        if isdisposed {
            self.n_not_alive_disposed -= 1;
        }
        if wrcount == 0 {
            trace!("[rhc] iid {iid} empty, no writers, drop");
            if !isdisposed {
                // disposed has priority over no-writers in the counters
                self.n_not_alive_no_writers -= 1;
            }
            self.drop_instance_noupdate_no_writers(iid);
            true
        } else {
            false
        }
    }

    fn drop_instance_noupdate_no_writers(&mut self, iid: InstanceId) {
        let inst = match self.instances.remove(&iid) {
            Some(inst) => inst,
            None => unreachable!("instance {iid} not in store"),
        };
        debug_assert!(inst.is_empty());
        self.n_instances -= 1;
        if inst.isnew {
            self.n_new -= 1;
        }
        if inst.deadline_reg {
            self.deadline.unregister(iid);
        }
    }

    // ---- sample insertion --------------------------------------------

    fn free_sample(&mut self, ix: SampleIx) {
        // Arc and lifespan entry die with the node; queue entries are
        // invalidated lazily through the slot serial.
        let _ = self.pool.free(ix);
    }

    fn add_sample(
        &mut self,
        iid: InstanceId,
        wrinfo: &WriterInfo,
        sample: &Arc<D>,
        qc: &mut TriggerInfoQc,
        nda: &mut bool,
    ) -> std::result::Result<(), SampleRejectedReason> {
        let ix = if self.inst(iid).nvsamples == self.history_depth {
            // keep-last at depth: replace the oldest in place
            self.inst_clear_invsample_if_exists(iid, qc);
            let latest = self.inst(iid).latest;
            debug_assert!(!latest.is_nil());
            let oldest = self.pool.get(latest).next;

            let (was_read, old_conds) = {
                let s = self.pool.get(oldest);
                (s.isread, s.conds)
            };
            debug_assert_eq!(qc.dec_conds_sample, 0);
            qc.dec_sample_read = was_read;
            qc.dec_conds_sample = old_conds;
            if was_read {
                self.inst_mut(iid).nvread -= 1;
                self.n_vread -= 1;
            }
            // new identity for the slot so stale lifespan entries die
            self.pool.renew_serial(oldest);
            let (disposed_gen, no_writers_gen) = {
                let inst = self.inst(iid);
                (inst.disposed_gen, inst.no_writers_gen)
            };
            let s = self.pool.get_mut(oldest);
            s.data = Arc::clone(sample);
            s.wr_iid = wrinfo.iid;
            s.isread = false;
            s.disposed_gen = disposed_gen;
            s.no_writers_gen = no_writers_gen;
            s.inst = iid;
            s.lifespan_registered = false;
            oldest
        } else {
            if self.max_samples != ResourceLimits::UNLIMITED
                && (self.n_vsamples as usize) >= self.max_samples
            {
                return Err(SampleRejectedReason::BySamplesLimit);
            }
            if self.max_samples_per_instance != ResourceLimits::UNLIMITED
                && (self.inst(iid).nvsamples as usize) >= self.max_samples_per_instance
            {
                return Err(SampleRejectedReason::BySamplesPerInstanceLimit);
            }

            self.inst_clear_invsample_if_exists(iid, qc);
            let (disposed_gen, no_writers_gen, latest) = {
                let inst = self.inst(iid);
                (inst.disposed_gen, inst.no_writers_gen, inst.latest)
            };
            let (ix, _) = self.pool.alloc(SampleNode {
                data: Arc::clone(sample),
                next: SampleIx::NIL,
                wr_iid: wrinfo.iid,
                conds: 0,
                isread: false,
                disposed_gen,
                no_writers_gen,
                inst: iid,
                lifespan_registered: false,
            });
            if latest.is_nil() {
                self.pool.get_mut(ix).next = ix;
            } else {
                let oldest = self.pool.get(latest).next;
                self.pool.get_mut(ix).next = oldest;
                self.pool.get_mut(latest).next = ix;
            }
            self.inst_mut(iid).nvsamples += 1;
            self.n_vsamples += 1;
            ix
        };

        if let Some(expiry) = wrinfo.lifespan_expiry {
            let serial = self.pool.serial_of(ix);
            self.pool.get_mut(ix).lifespan_registered = true;
            self.lifespan.register(expiry, ix, serial);
        }

        let mut conds_mask: QueryCondMask = 0;
        if self.nqconds != 0 {
            let value = sample.to_value();
            for cond in &self.conds {
                if let Some(pred) = cond.predicate() {
                    if (pred.as_ref())(&value) {
                        conds_mask |= cond.qcmask();
                    }
                }
            }
        }
        self.pool.get_mut(ix).conds = conds_mask;
        qc.inc_conds_sample = conds_mask;

        self.inst_mut(iid).latest = ix;
        *nda = true;
        Ok(())
    }

    fn store_new_instance(
        &mut self,
        wrinfo: &WriterInfo,
        sample: &Arc<D>,
        key: &Arc<KeyInstance<D>>,
        has_data: bool,
        qc: &mut TriggerInfoQc,
        nda: &mut bool,
        events: &mut OpEvents<D>,
    ) -> StoreResult {
        // Filtering before instantiating: a sample whose content is
        // rejected never creates an instance.
        if has_data {
            if let Some(filter) = &self.content_filter {
                if !(filter.as_ref())(&sample.to_value()) {
                    return StoreResult::Filtered;
                }
            }
        }

        let iid = key.iid();
        if self.max_instances != ResourceLimits::UNLIMITED
            && (self.n_instances as usize) >= self.max_instances
        {
            events.rejected = Some((SampleRejectedReason::ByInstancesLimit, iid));
            return StoreResult::Rejected;
        }

        let mut conds: QueryCondMask = 0;
        if self.nqconds != 0 {
            let key_value = key.key_sample().key_value();
            for cond in &self.conds {
                if let Some(pred) = cond.predicate() {
                    if (pred.as_ref())(&key_value) {
                        conds |= cond.qcmask();
                    }
                }
            }
        }

        self.instances.insert(
            iid,
            Instance {
                iid,
                key: Arc::clone(key),
                latest: SampleIx::NIL,
                nvsamples: 0,
                nvread: 0,
                conds,
                wrcount: 1,
                isnew: true,
                isdisposed: sample.status_info().is_dispose(),
                autodispose: wrinfo.auto_dispose,
                wr_iid_islive: true,
                inv_exists: false,
                inv_isread: false,
                deadline_reg: false,
                disposed_gen: 0,
                no_writers_gen: 0,
                strength: wrinfo.ownership_strength,
                wr_iid: wrinfo.iid,
                wr_guid: wrinfo.guid,
                tstamp: sample.source_timestamp(),
                nonempty_prev: iid,
                nonempty_next: iid,
            },
        );

        if has_data {
            if let Err(reason) = self.add_sample(iid, wrinfo, sample, qc, nda) {
                self.instances.remove(&iid);
                events.rejected = Some((reason, iid));
                return StoreResult::Rejected;
            }
        } else if self.inst(iid).isdisposed {
            self.inst_set_invsample(iid, qc, nda);
        }

        self.account_for_empty_to_nonempty_transition(iid);
        self.n_instances += 1;
        self.n_new += 1;
        trace!("[rhc] new instance {iid}");
        StoreResult::Stored
    }

    // ---- postprocessing ----------------------------------------------

    fn postprocess_instance_update(
        &mut self,
        iid: InstanceId,
        pre: &TriggerInfoCmn,
        post: &TriggerInfoCmn,
        qc: &TriggerInfoQc,
        events: &mut OpEvents<D>,
        now_ns: u64,
    ) {
        let mut dropped = !self.instances.contains_key(&iid);

        if !dropped {
            if let Some(dur) = self.deadline_dur {
                let (isdisposed, deadline_reg) = {
                    let inst = self.inst(iid);
                    (inst.isdisposed, inst.deadline_reg)
                };
                if isdisposed {
                    if deadline_reg {
                        self.inst_mut(iid).deadline_reg = false;
                        self.deadline.unregister(iid);
                    }
                } else if deadline_reg {
                    self.deadline.renew(iid, now_ns + dur);
                } else {
                    self.inst_mut(iid).deadline_reg = true;
                    self.deadline.register(iid, now_ns + dur);
                }
            }

            let inst = self.inst(iid);
            if inst.is_empty() && inst.wrcount == 0 {
                self.drop_instance_noupdate_no_writers(iid);
                dropped = true;
            }
        }

        if trigger_info_differs(self.nqconds, pre, post, qc) {
            let inst = if dropped { None } else { Some(iid) };
            self.update_conditions_for(inst, true, pre, post, qc, events);
        }

        self.check_counts();
    }

    // ---- lifespan ----------------------------------------------------

    fn drop_expired_sample(&mut self, ix: SampleIx, events: &mut OpEvents<D>) {
        let iid = self.pool.get(ix).inst;
        debug_assert!(!self.inst(iid).is_empty());
        trace!("[rhc] lifespan expiry iid {iid}");

        let pre = TriggerInfoCmn::of(self.inst(iid));
        let mut qc = TriggerInfoQc::default();

        // Find the predecessor: with depth 1 the sample is its own
        // predecessor; otherwise the expired one is most likely the oldest,
        // whose predecessor is `latest`.
        let latest = self.inst(iid).latest;
        let mut prev = latest;
        while self.pool.get(prev).next != ix {
            prev = self.pool.get(prev).next;
        }

        let (was_read, old_conds, next) = {
            let s = self.pool.get(ix);
            (s.isread, s.conds, s.next)
        };
        self.n_vsamples -= 1;
        if was_read {
            self.inst_mut(iid).nvread -= 1;
            self.n_vread -= 1;
            qc.dec_sample_read = true;
        }
        {
            let inst = self.inst_mut(iid);
            inst.nvsamples -= 1;
            if inst.nvsamples > 0 {
                if inst.latest == ix {
                    inst.latest = prev;
                }
            } else {
                inst.latest = SampleIx::NIL;
            }
        }
        if !self.inst(iid).latest.is_nil() {
            self.pool.get_mut(prev).next = next;
        }
        qc.dec_conds_sample = old_conds;
        self.free_sample(ix);

        let post = TriggerInfoCmn::of(self.inst(iid));
        self.update_conditions_for(Some(iid), false, &pre, &post, &qc, events);
        if self.inst(iid).is_empty() {
            self.account_for_nonempty_to_empty_transition(iid);
        }
        self.check_counts();
    }

    // ---- condition attach helpers ------------------------------------

    /// 0/1 trigger contribution of one non-empty instance for a plain read
    /// condition.
    fn plain_cond_trigger(&self, iid: InstanceId, cond: &ReadCondition<D>) -> u32 {
        let inst = self.inst(iid);
        debug_assert!(!inst.is_empty());
        if inst.qmask() & cond.qminv() != 0 {
            return 0;
        }
        use crate::condition::StateMask;
        let m = match cond.sample_states() {
            s if s == StateMask::READ.bits() => inst.has_read(),
            s if s == StateMask::NOT_READ.bits() => inst.has_unread(),
            _ => !inst.is_empty(),
        };
        u32::from(m)
    }

    /// Initialize the per-instance and per-sample bits of a freshly
    /// attached query condition; returns its initial trigger.
    fn rescan_query_condition(&mut self, cond: &Arc<ReadCondition<D>>) -> u32 {
        let qcmask = cond.qcmask();
        let qminv = cond.qminv();
        let Some(pred) = cond.predicate() else {
            return 0;
        };
        let mut trigger = 0;
        for iid in self.instance_ids() {
            let inst_match = {
                let inst = self.inst(iid);
                (pred.as_ref())(&inst.key.key_sample().key_value())
            };
            {
                let inst = self.inst_mut(iid);
                inst.conds = (inst.conds & !qcmask) | if inst_match { qcmask } else { 0 };
            }

            let mut sample_matches = 0u32;
            let latest = self.inst(iid).latest;
            if !latest.is_nil() {
                let first = self.pool.get(latest).next;
                let mut ix = first;
                loop {
                    let matched = (pred.as_ref())(&self.pool.get(ix).data.to_value());
                    let s = self.pool.get_mut(ix);
                    s.conds = (s.conds & !qcmask) | if matched { qcmask } else { 0 };
                    if matched
                        && (instance::qmask_of_read_state(s.isread) & qminv) == 0
                    {
                        sample_matches += 1;
                    }
                    let next = s.next;
                    ix = next;
                    if ix == first {
                        break;
                    }
                }
            }

            let inst = self.inst(iid);
            if !inst.is_empty() && (inst.qmask() & qminv) == 0 {
                if inst.inv_exists
                    && inst_match
                    && (inst.qmask_of_invsample() & qminv) == 0
                {
                    trigger += 1;
                }
                trigger += sample_matches;
            }
        }
        trigger
    }

    // ---- expensive cross-checks --------------------------------------

    /// Recompute every aggregate counter and condition trigger from
    /// scratch and compare. Debug builds only, and only when enabled.
    fn check_counts(&self) {
        #[cfg(debug_assertions)]
        {
            if !self.xchecks {
                return;
            }
            let mut n_nonempty = 0u32;
            let mut n_disposed = 0u32;
            let mut n_no_writers = 0u32;
            let mut n_new = 0u32;
            let mut n_vsamples = 0u32;
            let mut n_vread = 0u32;
            let mut n_invsamples = 0u32;
            let mut n_invread = 0u32;
            let mut cond_match: Vec<u32> = vec![0; self.conds.len()];

            for inst in self.instances.values() {
                if inst.isnew {
                    n_new += 1;
                }
                let mut in_inst = 0u32;
                let mut read_in_inst = 0u32;
                if !inst.latest.is_nil() {
                    let first = self.pool.get(inst.latest).next;
                    let mut ix = first;
                    loop {
                        let s = self.pool.get(ix);
                        in_inst += 1;
                        if s.isread {
                            read_in_inst += 1;
                        }
                        ix = s.next;
                        if ix == first {
                            break;
                        }
                    }
                }
                assert_eq!(in_inst, inst.nvsamples);
                assert_eq!(read_in_inst, inst.nvread);
                n_vsamples += in_inst;
                n_vread += read_in_inst;

                if inst.inv_exists {
                    n_invsamples += 1;
                    n_invread += u32::from(inst.inv_isread);
                }
                if inst.is_empty() {
                    continue;
                }
                n_nonempty += 1;
                if inst.isdisposed {
                    n_disposed += 1;
                } else if inst.wrcount == 0 {
                    n_no_writers += 1;
                }

                for (i, cond) in self.conds.iter().enumerate() {
                    if inst.qmask() & cond.qminv() != 0 {
                        continue;
                    }
                    if !cond.is_query() {
                        cond_match[i] += self.plain_cond_trigger(inst.iid, cond);
                    } else {
                        let qcmask = cond.qcmask();
                        if inst.inv_exists
                            && (inst.qmask_of_invsample() & cond.qminv()) == 0
                            && (inst.conds & qcmask) != 0
                        {
                            cond_match[i] += 1;
                        }
                        if !inst.latest.is_nil() {
                            let first = self.pool.get(inst.latest).next;
                            let mut ix = first;
                            loop {
                                let s = self.pool.get(ix);
                                if (instance::qmask_of_read_state(s.isread) & cond.qminv()) == 0
                                    && (s.conds & qcmask) != 0
                                {
                                    cond_match[i] += 1;
                                }
                                ix = s.next;
                                if ix == first {
                                    break;
                                }
                            }
                        }
                    }
                }
            }

            assert_eq!(self.n_instances as usize, self.instances.len());
            assert_eq!(self.n_nonempty_instances, n_nonempty);
            assert_eq!(self.n_not_alive_disposed, n_disposed);
            assert_eq!(self.n_not_alive_no_writers, n_no_writers);
            assert_eq!(self.n_new, n_new);
            assert_eq!(self.n_vsamples, n_vsamples);
            assert_eq!(self.n_vread, n_vread);
            assert_eq!(self.n_invsamples, n_invsamples);
            assert_eq!(self.n_invread, n_invread);
            for (i, cond) in self.conds.iter().enumerate() {
                use crate::condition::Condition;
                assert_eq!(cond.trigger_count(), cond_match[i]);
            }
            assert_eq!(self.n_nonempty_instances, self.nonempty_instance_ids().len() as u32);
        }
    }
}
