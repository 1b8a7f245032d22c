// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Instance and sample storage.
//!
//! Samples live in a slab arena behind `u32` handles; each instance threads
//! its samples into a circular singly-linked list ordered oldest to newest:
//!
//! ```text
//!   latest ──► [S3] ──► [S0] ──► [S1] ──► [S2] ──┐
//!     ▲        newest   oldest                   │
//!     └──────────────────────────────────────────┘
//! ```
//!
//! `latest.next` is the oldest sample, which makes both append and
//! keep-last overwrite O(1). Slots carry a reuse serial so the lifespan
//! queue can hold (handle, serial) pairs and detect stale entries lazily.

use crate::condition::QueryCondMask;
use crate::guid::Guid;
use crate::keymap::KeyInstance;
use crate::sample::{InstanceId, InstanceState, WriterId};
use crate::time::Timestamp;
use std::sync::Arc;

/// Handle into the sample arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SampleIx(u32);

impl SampleIx {
    pub const NIL: SampleIx = SampleIx(u32::MAX);

    pub fn is_nil(self) -> bool {
        self == Self::NIL
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn from_raw(raw: u32) -> Self {
        SampleIx(raw)
    }
}

/// A stored valid sample.
pub(crate) struct SampleNode<D> {
    /// Serialized data; the cache holds this one ref.
    pub data: Arc<D>,
    /// Next sample in time ordering (oldest when this is the newest).
    pub next: SampleIx,
    /// Writer that produced the sample.
    pub wr_iid: WriterId,
    /// Matching query conditions.
    pub conds: QueryCondMask,
    /// READ or NOT_READ sample state.
    pub isread: bool,
    /// Snapshot of the instance counters at insertion.
    pub disposed_gen: u32,
    pub no_writers_gen: u32,
    /// Owning instance (lifespan expiry needs to find it).
    pub inst: InstanceId,
    /// Whether an entry for this sample sits in the lifespan queue.
    pub lifespan_registered: bool,
}

struct Slot<D> {
    serial: u64,
    node: Option<SampleNode<D>>,
}

/// Slab arena for sample nodes with a free list and reuse serials.
pub(crate) struct SamplePool<D> {
    slots: Vec<Slot<D>>,
    free: Vec<u32>,
    next_serial: u64,
}

impl<D> SamplePool<D> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            next_serial: 1,
        }
    }

    /// Store a node, returning its handle and reuse serial.
    pub fn alloc(&mut self, node: SampleNode<D>) -> (SampleIx, u64) {
        let serial = self.next_serial;
        self.next_serial += 1;
        if let Some(ix) = self.free.pop() {
            let slot = &mut self.slots[ix as usize];
            slot.serial = serial;
            slot.node = Some(node);
            (SampleIx(ix), serial)
        } else {
            self.slots.push(Slot {
                serial,
                node: Some(node),
            });
            (SampleIx(self.slots.len() as u32 - 1), serial)
        }
    }

    /// Release a node. The slot's serial stays until reuse, invalidating
    /// any (handle, serial) pair still referencing it.
    pub fn free(&mut self, ix: SampleIx) -> SampleNode<D> {
        let slot = &mut self.slots[ix.0 as usize];
        let node = match slot.node.take() {
            Some(node) => node,
            None => unreachable!("double free of sample slot {}", ix.0),
        };
        self.free.push(ix.0);
        node
    }

    pub fn get(&self, ix: SampleIx) -> &SampleNode<D> {
        match self.slots[ix.0 as usize].node.as_ref() {
            Some(node) => node,
            None => unreachable!("stale sample handle {}", ix.0),
        }
    }

    pub fn get_mut(&mut self, ix: SampleIx) -> &mut SampleNode<D> {
        match self.slots[ix.0 as usize].node.as_mut() {
            Some(node) => node,
            None => unreachable!("stale sample handle {}", ix.0),
        }
    }

    /// Whether (handle, serial) still names a live node.
    pub fn is_current(&self, ix: SampleIx, serial: u64) -> bool {
        let slot = &self.slots[ix.0 as usize];
        slot.serial == serial && slot.node.is_some()
    }

    /// Current reuse serial of a live slot.
    pub fn serial_of(&self, ix: SampleIx) -> u64 {
        self.slots[ix.0 as usize].serial
    }

    /// Give a live slot a fresh identity, invalidating outstanding
    /// (handle, serial) pairs. Used when a sample is overwritten in place.
    pub fn renew_serial(&mut self, ix: SampleIx) -> u64 {
        let serial = self.next_serial;
        self.next_serial += 1;
        self.slots[ix.0 as usize].serial = serial;
        serial
    }
}

/// Per-instance state: key identity, sample list, registrations summary,
/// view/instance state and generation counters.
pub(crate) struct Instance<D> {
    /// Unique instance id; hash key and public instance handle.
    pub iid: InstanceId,
    /// Key-map entry; provides the stored key sample for invalid samples.
    pub key: Arc<KeyInstance<D>>,
    /// Latest received sample, NIL if none.
    pub latest: SampleIx,
    /// Number of valid samples.
    pub nvsamples: u32,
    /// Number of READ valid samples (<= nvsamples).
    pub nvread: u32,
    /// Query conditions matching the key projection.
    pub conds: QueryCondMask,
    /// Number of live writer registrations.
    pub wrcount: u32,
    /// NEW or NOT_NEW view state.
    pub isnew: bool,
    /// Last protocol event was a dispose.
    pub isdisposed: bool,
    /// Sticky: some registered writer had auto-dispose set.
    pub autodispose: bool,
    /// Whether wr_iid names a live writer (fast-path cache validity).
    pub wr_iid_islive: bool,
    /// Invalid-sample presence and read state.
    pub inv_exists: bool,
    pub inv_isread: bool,
    /// Registered with the deadline queue.
    pub deadline_reg: bool,
    /// NOT_ALIVE -> ALIVE transition counters.
    pub disposed_gen: u32,
    pub no_writers_gen: u32,
    /// Current ownership strength.
    pub strength: i32,
    /// Most recent writer (meaningful content even when not live: it is the
    /// writer that caused the latest state change).
    pub wr_iid: WriterId,
    pub wr_guid: Guid,
    /// Source timestamp of the last accepted update.
    pub tstamp: Timestamp,
    /// Intrusive links threading non-empty instances, valid while on the
    /// non-empty list.
    pub nonempty_prev: InstanceId,
    pub nonempty_next: InstanceId,
}

impl<D> Instance<D> {
    pub fn nsamples(&self) -> u32 {
        self.nvsamples + u32::from(self.inv_exists)
    }

    pub fn nread(&self) -> u32 {
        self.nvread + u32::from(self.inv_exists && self.inv_isread)
    }

    pub fn is_empty(&self) -> bool {
        self.nsamples() == 0
    }

    pub fn has_read(&self) -> bool {
        self.nread() > 0
    }

    pub fn has_unread(&self) -> bool {
        self.nread() < self.nsamples()
    }

    pub fn instance_state(&self) -> InstanceState {
        if self.isdisposed {
            InstanceState::NotAliveDisposed
        } else if self.wrcount == 0 {
            InstanceState::NotAliveNoWriters
        } else {
            InstanceState::Alive
        }
    }

    /// View + instance state bits of this instance.
    pub fn qmask(&self) -> u32 {
        use crate::condition::StateMask;
        let mut qm = if self.isnew {
            StateMask::NEW.bits()
        } else {
            StateMask::NOT_NEW.bits()
        };
        qm |= match self.instance_state() {
            InstanceState::Alive => StateMask::ALIVE.bits(),
            InstanceState::NotAliveDisposed => StateMask::NOT_ALIVE_DISPOSED.bits(),
            InstanceState::NotAliveNoWriters => StateMask::NOT_ALIVE_NO_WRITERS.bits(),
        };
        qm
    }

    /// Sample-state bit of the invalid sample.
    pub fn qmask_of_invsample(&self) -> u32 {
        qmask_of_read_state(self.inv_isread)
    }
}

/// Sample-state bit for a read flag.
pub(crate) fn qmask_of_read_state(isread: bool) -> u32 {
    use crate::condition::StateMask;
    if isread {
        StateMask::READ.bits()
    } else {
        StateMask::NOT_READ.bits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy;

    #[test]
    fn pool_reuses_slots_and_bumps_serials() {
        let mut pool: SamplePool<Dummy> = SamplePool::new();
        let node = |iid| SampleNode {
            data: Arc::new(Dummy),
            next: SampleIx::NIL,
            wr_iid: WriterId(1),
            conds: 0,
            isread: false,
            disposed_gen: 0,
            no_writers_gen: 0,
            inst: InstanceId(iid),
            lifespan_registered: false,
        };

        let (a, sa) = pool.alloc(node(1));
        assert!(pool.is_current(a, sa));

        pool.free(a);
        assert!(!pool.is_current(a, sa));

        let (b, sb) = pool.alloc(node(2));
        assert_eq!(a, b, "freed slot should be reused");
        assert_ne!(sa, sb, "reused slot must carry a fresh serial");
        assert!(pool.is_current(b, sb));
        assert_eq!(pool.get(b).inst, InstanceId(2));
    }
}
