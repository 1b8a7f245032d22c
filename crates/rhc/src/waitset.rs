// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Waitset implementation for condition-based blocking waits.
//!
//! A [`WaitSet`] parks the calling thread until one of its attached
//! conditions triggers. Conditions wake waitsets through the
//! [`WaitsetSignal`] hook; trigger evaluation itself never takes the cache
//! lock.

use crate::condition::Condition;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Wake-up hook handed to conditions.
///
/// Implementations must be cheap and non-blocking; they run inside the
/// notifying operation.
pub trait WaitsetSignal: Send + Sync {
    /// Unique id of the receiving waitset (for detach).
    fn id(&self) -> u64;

    /// Wake the waitset.
    fn signal(&self);
}

struct WaitCore {
    id: u64,
    pending: Mutex<bool>,
    wakeup: Condvar,
}

impl WaitsetSignal for WaitCore {
    fn id(&self) -> u64 {
        self.id
    }

    fn signal(&self) {
        let mut pending = self.pending.lock();
        *pending = true;
        self.wakeup.notify_all();
    }
}

/// A set of conditions to block on.
///
/// # Example
///
/// ```ignore
/// let ws = WaitSet::new();
/// ws.attach(cond.clone());
/// let triggered = ws.wait(Duration::from_millis(100));
/// for c in triggered {
///     // read with the triggering condition
/// }
/// ```
pub struct WaitSet {
    core: Arc<WaitCore>,
    conditions: Mutex<Vec<Arc<dyn Condition>>>,
}

static NEXT_WAITSET_ID: AtomicU64 = AtomicU64::new(0x8000_0000);

impl WaitSet {
    /// Create an empty waitset.
    pub fn new() -> Self {
        Self {
            core: Arc::new(WaitCore {
                id: NEXT_WAITSET_ID.fetch_add(1, Ordering::Relaxed),
                pending: Mutex::new(false),
                wakeup: Condvar::new(),
            }),
            conditions: Mutex::new(Vec::new()),
        }
    }

    /// Attach a condition; an already-triggered condition wakes the waitset
    /// immediately.
    pub fn attach(&self, condition: Arc<dyn Condition>) {
        let mut conds = self.conditions.lock();
        if conds
            .iter()
            .any(|c| c.condition_id() == condition.condition_id())
        {
            return;
        }
        condition.add_waitset_signal(self.core.clone() as Arc<dyn WaitsetSignal>);
        conds.push(condition);
    }

    /// Detach a condition by id.
    pub fn detach(&self, condition_id: u64) {
        let mut conds = self.conditions.lock();
        if let Some(pos) = conds.iter().position(|c| c.condition_id() == condition_id) {
            let cond = conds.remove(pos);
            cond.remove_waitset_signal(self.core.id);
        }
    }

    /// Number of attached conditions.
    pub fn len(&self) -> usize {
        self.conditions.lock().len()
    }

    /// Whether no conditions are attached.
    pub fn is_empty(&self) -> bool {
        self.conditions.lock().is_empty()
    }

    /// Block until at least one attached condition triggers or the timeout
    /// elapses. Returns the triggered conditions (empty on timeout).
    pub fn wait(&self, timeout: Duration) -> Vec<Arc<dyn Condition>> {
        let deadline = Instant::now() + timeout;
        loop {
            let triggered: Vec<Arc<dyn Condition>> = self
                .conditions
                .lock()
                .iter()
                .filter(|c| c.is_triggered())
                .cloned()
                .collect();
            if !triggered.is_empty() {
                return triggered;
            }

            let mut pending = self.core.pending.lock();
            // A signal may have landed between the scan and the lock.
            if !*pending {
                let now = Instant::now();
                if now >= deadline {
                    return Vec::new();
                }
                let timed_out = self
                    .core
                    .wakeup
                    .wait_until(&mut pending, deadline)
                    .timed_out();
                if timed_out && !*pending {
                    return Vec::new();
                }
            }
            *pending = false;
        }
    }
}

impl Default for WaitSet {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WaitSet {
    fn drop(&mut self) {
        let conds = self.conditions.lock();
        for cond in conds.iter() {
            cond.remove_waitset_signal(self.core.id);
        }
    }
}
