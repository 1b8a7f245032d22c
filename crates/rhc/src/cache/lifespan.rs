// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Lifespan expiry queue.
//!
//! Min-heap of (expiry, serial, handle) triples over the sample arena.
//! Deregistration is lazy: freeing a sample invalidates its (handle, serial)
//! pair, and stale heap entries are discarded when they surface. This makes
//! cancel-vs-expire races a non-issue under the cache mutex.

use super::instance::SampleIx;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

#[derive(Default)]
pub(crate) struct LifespanQueue {
    heap: BinaryHeap<Reverse<(u64, u64, u32)>>,
}

impl LifespanQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sample for expiry at `expiry_ns` (monotonic).
    pub fn register(&mut self, expiry_ns: u64, ix: SampleIx, serial: u64) {
        self.heap.push(Reverse((expiry_ns, serial, ix.raw())));
    }

    /// Pop the next sample due at or before `now_ns`, discarding stale
    /// entries. `is_current` decides whether an entry still names a live,
    /// lifespan-registered sample.
    pub fn pop_expired(
        &mut self,
        now_ns: u64,
        mut is_current: impl FnMut(SampleIx, u64) -> bool,
    ) -> Option<SampleIx> {
        while let Some(&Reverse((expiry, serial, raw))) = self.heap.peek() {
            let ix = SampleIx::from_raw(raw);
            if !is_current(ix, serial) {
                self.heap.pop();
                continue;
            }
            if expiry <= now_ns {
                self.heap.pop();
                return Some(ix);
            }
            return None;
        }
        None
    }

    /// Next live expiry time, discarding stale entries on the way.
    pub fn next_expiry(
        &mut self,
        mut is_current: impl FnMut(SampleIx, u64) -> bool,
    ) -> Option<u64> {
        while let Some(&Reverse((expiry, serial, raw))) = self.heap.peek() {
            if is_current(SampleIx::from_raw(raw), serial) {
                return Some(expiry);
            }
            self.heap.pop();
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_in_expiry_order() {
        let mut q = LifespanQueue::new();
        q.register(30, SampleIx::from_raw(2), 102);
        q.register(10, SampleIx::from_raw(0), 100);
        q.register(20, SampleIx::from_raw(1), 101);

        let all_current = |_: SampleIx, _: u64| true;
        assert_eq!(q.pop_expired(5, all_current), None);
        assert_eq!(q.pop_expired(25, all_current), Some(SampleIx::from_raw(0)));
        assert_eq!(q.pop_expired(25, all_current), Some(SampleIx::from_raw(1)));
        assert_eq!(q.pop_expired(25, all_current), None);
        assert_eq!(q.next_expiry(all_current), Some(30));
    }

    #[test]
    fn stale_entries_are_skipped() {
        let mut q = LifespanQueue::new();
        q.register(10, SampleIx::from_raw(0), 100);
        q.register(20, SampleIx::from_raw(1), 101);

        // Entry 100 is stale (sample freed and slot reused).
        let filter = |_: SampleIx, serial: u64| serial != 100;
        assert_eq!(q.pop_expired(50, filter), Some(SampleIx::from_raw(1)));
        assert_eq!(q.next_expiry(filter), None);
    }
}
