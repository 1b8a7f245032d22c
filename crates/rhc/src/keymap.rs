// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Instance-key map: stable 64-bit instance ids for key values.
//!
//! Every key value observed on a topic gets exactly one [`KeyInstance`] for
//! as long as anyone holds a reference to it. The cache keeps one per live
//! instance; the stored key sample is what invalid samples deserialize from.

use crate::sample::{InstanceId, SampleData};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// A key value pinned in the map: stable instance id plus the stored
/// key-only sample.
pub struct KeyInstance<D> {
    iid: InstanceId,
    key_sample: Arc<D>,
}

impl<D> KeyInstance<D> {
    /// Instance id; stable for the lifetime of the key value.
    pub fn iid(&self) -> InstanceId {
        self.iid
    }

    /// The stored key-only sample for this key value.
    pub fn key_sample(&self) -> &Arc<D> {
        &self.key_sample
    }
}

/// Key-to-instance map shared by all endpoints of a topic.
///
/// Ids are drawn from a process-wide counter mixed to spread over the id
/// space, so they hash well without a keyed hasher.
pub struct KeyMap<D: SampleData> {
    entries: Mutex<HashMap<D::Key, Weak<KeyInstance<D>>>>,
}

static NEXT_IID: AtomicU64 = AtomicU64::new(1);

fn fresh_iid() -> InstanceId {
    // splitmix64 finalizer over a sequential counter: unique and
    // uniformly spread.
    let mut z = NEXT_IID.fetch_add(1, Ordering::Relaxed);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^= z >> 31;
    InstanceId(z | 1)
}

impl<D: SampleData> KeyMap<D> {
    /// Create an empty map.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Find or create the instance for a sample's key value.
    ///
    /// The sample itself is stored as the key sample when the key value is
    /// new; callers on the receive path pass the incoming (possibly
    /// key-only) sample.
    pub fn instance(&self, sample: &Arc<D>) -> Arc<KeyInstance<D>> {
        let key = sample.key();
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(&key).and_then(Weak::upgrade) {
            return existing;
        }
        let inst = Arc::new(KeyInstance {
            iid: fresh_iid(),
            key_sample: Arc::clone(sample),
        });
        entries.insert(key, Arc::downgrade(&inst));
        inst
    }

    /// Look up an existing instance by key value without creating one.
    pub fn lookup(&self, key: &D::Key) -> Option<Arc<KeyInstance<D>>> {
        self.entries.lock().get(key).and_then(Weak::upgrade)
    }

    /// Drop map entries whose instances are gone.
    pub fn prune(&self) {
        self.entries
            .lock()
            .retain(|_, weak| weak.upgrade().is_some());
    }
}

impl<D: SampleData> Default for KeyMap<D> {
    fn default() -> Self {
        Self::new()
    }
}
