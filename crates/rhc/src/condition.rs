// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Read conditions and query conditions for cache event filtering.
//!
//! A [`ReadCondition`] selects samples by a [`StateMask`] triple and, for
//! query conditions, a content predicate. Its trigger is a count of matching
//! samples, maintained incrementally by the cache while the condition is
//! attached; waitsets hook into the 0-to-positive transitions.

use crate::sample::SampleData;
use crate::waitset::WaitsetSignal;
use parking_lot::Mutex;
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Combined sample/view/instance state mask.
///
/// One bit per state, three groups in one word. A mask is the bitwise OR of
/// desired states; a zero group means "any state in that group".
///
/// Per DDS v1.4 spec section 2.2.2.5.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateMask(u32);

impl StateMask {
    /// Sample has been read
    pub const READ: StateMask = StateMask(1);
    /// Sample has not been read
    pub const NOT_READ: StateMask = StateMask(2);
    /// Any sample state
    pub const ANY_SAMPLE: StateMask = StateMask(3);

    /// Instance is new (first sample or resurrection)
    pub const NEW: StateMask = StateMask(4);
    /// Instance has been seen before
    pub const NOT_NEW: StateMask = StateMask(8);
    /// Any view state
    pub const ANY_VIEW: StateMask = StateMask(12);

    /// Instance has live writers and is not disposed
    pub const ALIVE: StateMask = StateMask(16);
    /// Instance was disposed
    pub const NOT_ALIVE_DISPOSED: StateMask = StateMask(32);
    /// Instance has no registered writers left
    pub const NOT_ALIVE_NO_WRITERS: StateMask = StateMask(64);
    /// Any instance state
    pub const ANY_INSTANCE: StateMask = StateMask(112);

    /// Any state in all three groups
    pub const ANY: StateMask = StateMask(127);

    /// Create from raw bits
    pub const fn from_bits(bits: u32) -> Self {
        StateMask(bits)
    }

    /// Raw bits
    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// Check if this mask contains all states of `other`
    pub const fn contains(&self, other: StateMask) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Sample-state group of this mask.
    pub(crate) const fn sample_states(&self) -> u32 {
        self.0 & Self::ANY_SAMPLE.0
    }

    /// Rejection mask: the set of state bits that disqualify a sample.
    ///
    /// A group contributes its complement when it selects a proper subset;
    /// a zero or full group contributes nothing (any state passes).
    pub(crate) const fn qminv(&self) -> u32 {
        let mut qminv = 0;
        let sample = self.0 & Self::ANY_SAMPLE.0;
        if sample != 0 && sample != Self::ANY_SAMPLE.0 {
            qminv |= Self::ANY_SAMPLE.0 & !sample;
        }
        let view = self.0 & Self::ANY_VIEW.0;
        if view != 0 && view != Self::ANY_VIEW.0 {
            qminv |= Self::ANY_VIEW.0 & !view;
        }
        let instance = self.0 & Self::ANY_INSTANCE.0;
        if instance != 0 && instance != Self::ANY_INSTANCE.0 {
            qminv |= Self::ANY_INSTANCE.0 & !instance;
        }
        qminv
    }
}

impl std::ops::BitOr for StateMask {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        StateMask(self.0 | rhs.0)
    }
}

/// Bit slot assigned to an attached query condition.
///
/// One bit out of a shared 64-bit space per cache; instances and samples
/// carry the OR of the bits whose predicates they match.
pub(crate) type QueryCondMask = u64;

/// Content predicate of a query condition.
pub type SamplePredicate<D> =
    Arc<dyn Fn(&<D as SampleData>::Value) -> bool + Send + Sync>;

/// Condition trait - base interface for waitset attachment
///
/// A condition is triggered while its trigger count is positive. The count
/// is readable without taking the cache lock.
pub trait Condition: Send + Sync {
    /// Current trigger count.
    fn trigger_count(&self) -> u32;

    /// Whether the condition currently triggers.
    fn is_triggered(&self) -> bool {
        self.trigger_count() > 0
    }

    /// Unique identifier for this condition (for comparison)
    fn condition_id(&self) -> u64;

    /// Register a waitset signal so this condition can wake blocked waiters.
    fn add_waitset_signal(&self, signal: Arc<dyn WaitsetSignal>);

    /// Remove a previously registered waitset signal.
    fn remove_waitset_signal(&self, signal_id: u64);

    /// Downcast support for dynamic condition handling.
    fn as_any(&self) -> &dyn Any;
}

struct SignalHook {
    id: u64,
    signal: Weak<dyn WaitsetSignal>,
}

/// Condition on a reader history cache.
///
/// Plain read conditions ([`ReadCondition::new`]) match on states alone;
/// query conditions ([`ReadCondition::with_query`]) additionally require a
/// content predicate to hold.
///
/// # Example
///
/// ```ignore
/// // Trigger on unread samples whose payload exceeds a threshold
/// let cond = ReadCondition::with_query(
///     StateMask::NOT_READ | StateMask::ANY_VIEW | StateMask::ANY_INSTANCE,
///     Arc::new(|v: &Temperature| v.celsius > 90.0),
/// );
/// ```
pub struct ReadCondition<D: SampleData> {
    id: u64,
    mask: StateMask,
    qminv: u32,
    predicate: Option<SamplePredicate<D>>,
    /// Assigned bit while attached, 0 otherwise.
    qcmask: AtomicU64,
    attached: AtomicBool,
    trigger: AtomicU32,
    signals: Mutex<Vec<SignalHook>>,
}

static NEXT_CONDITION_ID: AtomicU64 = AtomicU64::new(0x4000_0000);

impl<D: SampleData> ReadCondition<D> {
    /// Create a plain read condition matching on states alone.
    pub fn new(mask: StateMask) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_CONDITION_ID.fetch_add(1, Ordering::Relaxed),
            mask,
            qminv: mask.qminv(),
            predicate: None,
            qcmask: AtomicU64::new(0),
            attached: AtomicBool::new(false),
            trigger: AtomicU32::new(0),
            signals: Mutex::new(Vec::new()),
        })
    }

    /// Create a query condition with a content predicate.
    pub fn with_query(mask: StateMask, predicate: SamplePredicate<D>) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_CONDITION_ID.fetch_add(1, Ordering::Relaxed),
            mask,
            qminv: mask.qminv(),
            predicate: Some(predicate),
            qcmask: AtomicU64::new(0),
            attached: AtomicBool::new(false),
            trigger: AtomicU32::new(0),
            signals: Mutex::new(Vec::new()),
        })
    }

    /// The state mask this condition was created with.
    pub fn mask(&self) -> StateMask {
        self.mask
    }

    /// Whether this is a query condition.
    pub fn is_query(&self) -> bool {
        self.predicate.is_some()
    }

    pub(crate) fn qminv(&self) -> u32 {
        self.qminv
    }

    pub(crate) fn sample_states(&self) -> u32 {
        self.mask.sample_states()
    }

    pub(crate) fn predicate(&self) -> Option<&SamplePredicate<D>> {
        self.predicate.as_ref()
    }

    pub(crate) fn qcmask(&self) -> QueryCondMask {
        self.qcmask.load(Ordering::Relaxed)
    }

    pub(crate) fn set_qcmask(&self, mask: QueryCondMask) {
        self.qcmask.store(mask, Ordering::Relaxed);
    }

    pub(crate) fn mark_attached(&self) -> bool {
        !self.attached.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn mark_detached(&self) {
        self.attached.store(false, Ordering::Release);
    }

    pub(crate) fn set_trigger(&self, value: u32) {
        self.trigger.store(value, Ordering::Release);
    }

    /// Increment the trigger by one; returns the previous value.
    pub(crate) fn trigger_inc(&self) -> u32 {
        self.trigger.fetch_add(1, Ordering::AcqRel)
    }

    /// Decrement the trigger by one; returns the new value.
    pub(crate) fn trigger_dec(&self) -> u32 {
        let old = self.trigger.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(old > 0, "condition trigger underflow");
        old - 1
    }

    /// Apply a signed delta; returns the previous value.
    pub(crate) fn trigger_add(&self, delta: i32) -> u32 {
        if delta >= 0 {
            self.trigger.fetch_add(delta as u32, Ordering::AcqRel)
        } else {
            let old = self.trigger.fetch_sub(delta.unsigned_abs(), Ordering::AcqRel);
            debug_assert!(old >= delta.unsigned_abs(), "condition trigger underflow");
            old
        }
    }

    /// Wake every waitset hooked to this condition.
    pub(crate) fn signal_waitsets(&self) {
        let mut hooks = self.signals.lock();
        hooks.retain(|hook| {
            if let Some(signal) = hook.signal.upgrade() {
                signal.signal();
                true
            } else {
                false
            }
        });
    }
}

impl<D: SampleData> Condition for ReadCondition<D> {
    fn trigger_count(&self) -> u32 {
        self.trigger.load(Ordering::Acquire)
    }

    fn condition_id(&self) -> u64 {
        self.id
    }

    fn add_waitset_signal(&self, signal: Arc<dyn WaitsetSignal>) {
        let mut hooks = self.signals.lock();
        hooks.retain(|hook| hook.signal.upgrade().is_some());
        hooks.push(SignalHook {
            id: signal.id(),
            signal: Arc::downgrade(&signal),
        });
        drop(hooks);

        if self.is_triggered() {
            signal.signal();
        }
    }

    fn remove_waitset_signal(&self, signal_id: u64) {
        self.signals.lock().retain(|hook| hook.id != signal_id);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qminv_rejects_complement() {
        // Wants NOT_READ only: READ samples must be rejected.
        let mask = StateMask::NOT_READ | StateMask::ANY_VIEW | StateMask::ANY_INSTANCE;
        assert_eq!(mask.qminv(), StateMask::READ.bits());

        // Wants ALIVE only: both not-alive states rejected.
        let mask = StateMask::ANY_SAMPLE | StateMask::ANY_VIEW | StateMask::ALIVE;
        assert_eq!(
            mask.qminv(),
            StateMask::NOT_ALIVE_DISPOSED.bits() | StateMask::NOT_ALIVE_NO_WRITERS.bits()
        );

        // Zero groups mean any: nothing rejected.
        assert_eq!(StateMask::from_bits(0).qminv(), 0);
        assert_eq!(StateMask::ANY.qminv(), 0);
    }

    #[test]
    fn qminv_two_of_three_instance_states() {
        let mask = StateMask::ALIVE | StateMask::NOT_ALIVE_DISPOSED;
        assert_eq!(mask.qminv(), StateMask::NOT_ALIVE_NO_WRITERS.bits());
    }

    #[test]
    fn state_mask_constants_match_wire_values() {
        assert_eq!(StateMask::READ.bits(), 1);
        assert_eq!(StateMask::NOT_READ.bits(), 2);
        assert_eq!(StateMask::ANY_SAMPLE.bits(), 3);
        assert_eq!(StateMask::NEW.bits(), 4);
        assert_eq!(StateMask::NOT_NEW.bits(), 8);
        assert_eq!(StateMask::ANY_VIEW.bits(), 12);
        assert_eq!(StateMask::ALIVE.bits(), 16);
        assert_eq!(StateMask::NOT_ALIVE_DISPOSED.bits(), 32);
        assert_eq!(StateMask::NOT_ALIVE_NO_WRITERS.bits(), 64);
        assert_eq!(StateMask::ANY_INSTANCE.bits(), 112);
    }
}
