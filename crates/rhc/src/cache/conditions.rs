// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Incremental condition-trigger maintenance.
//!
//! Every mutation is bracketed by two snapshots of the instance's
//! condition-relevant state (view/instance mask, has-read, has-unread) plus
//! a record of which query-condition bits gained or lost a matching sample.
//! From those, each attached condition's trigger count is adjusted without
//! rescanning — except when an instance enters or leaves a condition's
//! instance-level match, where the one affected instance is recounted.

use super::instance::{qmask_of_read_state, Instance, SamplePool};
use super::OpEvents;
use crate::condition::{QueryCondMask, ReadCondition, StateMask};
use crate::sample::SampleData;
use std::sync::Arc;

/// Instance-level snapshot: view/instance state mask plus read/unread
/// availability, invalid sample included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TriggerInfoCmn {
    pub qminst: u32,
    pub has_read: bool,
    pub has_not_read: bool,
}

impl TriggerInfoCmn {
    /// Snapshot that matches no condition (used for created/destroyed
    /// instances).
    pub fn nonmatch() -> Self {
        Self {
            qminst: !0,
            has_read: false,
            has_not_read: false,
        }
    }

    pub fn of<D>(inst: &Instance<D>) -> Self {
        Self {
            qminst: inst.qmask(),
            has_read: inst.has_read(),
            has_not_read: inst.has_unread(),
        }
    }
}

/// Per-mutation record of query-condition bits that lost (`dec_*`) or
/// gained (`inc_*`) a matching sample, with the read states of those
/// samples. A read shows up as removal of an unread sample plus insertion
/// of a read one.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct TriggerInfoQc {
    pub dec_invsample_read: bool,
    pub dec_sample_read: bool,
    pub inc_invsample_read: bool,
    pub inc_sample_read: bool,
    pub dec_conds_invsample: QueryCondMask,
    pub dec_conds_sample: QueryCondMask,
    pub inc_conds_invsample: QueryCondMask,
    pub inc_conds_sample: QueryCondMask,
}

/// Whether a mutation can have moved any trigger at all.
pub(crate) fn trigger_info_differs(
    nqconds: u32,
    pre: &TriggerInfoCmn,
    post: &TriggerInfoCmn,
    qc: &TriggerInfoQc,
) -> bool {
    if pre != post {
        true
    } else if nqconds == 0 {
        false
    } else {
        qc.dec_conds_invsample != qc.inc_conds_invsample
            || qc.dec_conds_sample != qc.inc_conds_sample
            || qc.dec_invsample_read != qc.inc_invsample_read
            || qc.dec_sample_read != qc.inc_sample_read
    }
}

fn sample_state_match(cond_sample_states: u32, info: &TriggerInfoCmn, base: bool) -> bool {
    if !base {
        return false;
    }
    match cond_sample_states {
        s if s == StateMask::READ.bits() => info.has_read,
        s if s == StateMask::NOT_READ.bits() => info.has_not_read,
        _ => info.has_read || info.has_not_read,
    }
}

/// Signed trigger change implied by the qcond record, filtered by the
/// condition's sample-state interest.
fn mdelta_of(cond_sample_states: u32, qc: &TriggerInfoQc, qcmask: QueryCondMask) -> i32 {
    let hit = |mask: QueryCondMask| i32::from(mask & qcmask != 0);
    let mut mdelta = 0;
    match cond_sample_states {
        s if s == StateMask::READ.bits() => {
            if qc.dec_invsample_read {
                mdelta -= hit(qc.dec_conds_invsample);
            }
            if qc.dec_sample_read {
                mdelta -= hit(qc.dec_conds_sample);
            }
            if qc.inc_invsample_read {
                mdelta += hit(qc.inc_conds_invsample);
            }
            if qc.inc_sample_read {
                mdelta += hit(qc.inc_conds_sample);
            }
        }
        s if s == StateMask::NOT_READ.bits() => {
            if !qc.dec_invsample_read {
                mdelta -= hit(qc.dec_conds_invsample);
            }
            if !qc.dec_sample_read {
                mdelta -= hit(qc.dec_conds_sample);
            }
            if !qc.inc_invsample_read {
                mdelta += hit(qc.inc_conds_invsample);
            }
            if !qc.inc_sample_read {
                mdelta += hit(qc.inc_conds_sample);
            }
        }
        _ => {
            mdelta -= hit(qc.dec_conds_invsample);
            mdelta -= hit(qc.dec_conds_sample);
            mdelta += hit(qc.inc_conds_invsample);
            mdelta += hit(qc.inc_conds_sample);
        }
    }
    mdelta
}

/// Count the samples of one instance currently matching a query condition.
fn count_matches<D>(
    inst: &Instance<D>,
    pool: &SamplePool<D>,
    qminv: u32,
    qcmask: QueryCondMask,
) -> i32 {
    let mut m = 0;
    if inst.inv_exists
        && (inst.qmask_of_invsample() & qminv) == 0
        && (inst.conds & qcmask) != 0
    {
        m += 1;
    }
    if !inst.latest.is_nil() {
        let first = pool.get(inst.latest).next;
        let mut ix = first;
        loop {
            let s = pool.get(ix);
            if (qmask_of_read_state(s.isread) & qminv) == 0 && (s.conds & qcmask) != 0 {
                m += 1;
            }
            ix = s.next;
            if ix == first {
                break;
            }
        }
    }
    m
}

/// Apply one mutation's pre/post snapshots to every attached condition.
///
/// Conditions whose trigger goes from zero to positive are queued on
/// `events` so their waitsets get signalled after the cache lock drops.
pub(crate) fn update_conditions<D: SampleData>(
    conds: &[Arc<ReadCondition<D>>],
    called_from_insert: bool,
    pre: &TriggerInfoCmn,
    post: &TriggerInfoCmn,
    qc: &TriggerInfoQc,
    inst: Option<(&Instance<D>, &SamplePool<D>)>,
    events: &mut OpEvents<D>,
) {
    for cond in conds {
        let qminv = cond.qminv();
        let m_pre_base = pre.qminst & qminv == 0;
        let m_post_base = post.qminst & qminv == 0;
        if !m_pre_base && !m_post_base {
            continue;
        }

        let states = cond.sample_states();
        let m_pre = sample_state_match(states, pre, m_pre_base);
        let m_post = sample_state_match(states, post, m_post_base);

        if !cond.is_query() {
            if m_pre == m_post {
                // no change
            } else if !m_pre {
                if cond.trigger_inc() == 0 {
                    events.push_signal(cond);
                }
            } else {
                cond.trigger_dec();
            }
        } else if m_pre || m_post {
            let qcmask = cond.qcmask();
            let mdelta = mdelta_of(states, qc, qcmask);

            if m_pre == m_post {
                // Instance-level match unchanged (both true): the matching
                // samples are already accounted for, apply the per-sample
                // delta.
                if cond.trigger_add(mdelta) == 0 && mdelta > 0 {
                    events.push_signal(cond);
                }
            } else {
                // Instance entered or left the match: recount this one
                // instance from scratch.
                let mcurrent = match inst {
                    Some((inst, pool)) => count_matches(inst, pool, qminv, qcmask),
                    None => 0,
                };
                if !m_pre {
                    // Inserts see the post-mutation sample set; read/take
                    // evaluate before mutating, so the delta still applies.
                    let m = if called_from_insert {
                        mcurrent
                    } else {
                        mcurrent + mdelta
                    };
                    if cond.trigger_add(m) == 0 && m > 0 {
                        events.push_signal(cond);
                    }
                } else {
                    // Matched before, gone now: subtract the current matches
                    // plus whatever the mutation already removed.
                    let m = mcurrent - mdelta;
                    cond.trigger_add(-m);
                }
            }
        }
    }
}
