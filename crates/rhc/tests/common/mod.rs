// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared fixtures: a small keyed topic type, writers with ordered GUIDs,
//! a recording listener and a manually advanced clock.

#![allow(dead_code)]

use rhc::{
    Clock, Guid, ReaderListener, RequestedDeadlineMissedStatus, SampleData, SampleKind,
    SampleLostStatus, SampleRejectedStatus, StatusInfo, Timestamp, WriterId, WriterInfo,
};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Deserialized form of the test topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyedValue {
    pub key: u32,
    pub value: i64,
}

/// Serialized-sample stand-in: key, payload, kind, status bits, timestamp.
pub struct TestSample {
    kind: SampleKind,
    status: StatusInfo,
    timestamp: Timestamp,
    key: u32,
    value: i64,
}

impl TestSample {
    pub fn data(key: u32, value: i64, ts: i64) -> Arc<Self> {
        Arc::new(Self {
            kind: SampleKind::Data,
            status: StatusInfo::NONE,
            timestamp: Timestamp::from_nanos(ts),
            key,
            value,
        })
    }

    /// A write that also disposes (write-dispose).
    pub fn data_dispose(key: u32, value: i64, ts: i64) -> Arc<Self> {
        Arc::new(Self {
            kind: SampleKind::Data,
            status: StatusInfo::DISPOSE,
            timestamp: Timestamp::from_nanos(ts),
            key,
            value,
        })
    }

    pub fn dispose(key: u32, ts: i64) -> Arc<Self> {
        Arc::new(Self {
            kind: SampleKind::Key,
            status: StatusInfo::DISPOSE,
            timestamp: Timestamp::from_nanos(ts),
            key,
            value: 0,
        })
    }

    pub fn unregister(key: u32, ts: i64) -> Arc<Self> {
        Arc::new(Self {
            kind: SampleKind::Key,
            status: StatusInfo::UNREGISTER,
            timestamp: Timestamp::from_nanos(ts),
            key,
            value: 0,
        })
    }

    pub fn dispose_unregister(key: u32, ts: i64) -> Arc<Self> {
        Arc::new(Self {
            kind: SampleKind::Key,
            status: StatusInfo::DISPOSE | StatusInfo::UNREGISTER,
            timestamp: Timestamp::from_nanos(ts),
            key,
            value: 0,
        })
    }

    /// A key-only sample with no status bits (implicit register).
    pub fn register_only(key: u32, ts: i64) -> Arc<Self> {
        Arc::new(Self {
            kind: SampleKind::Key,
            status: StatusInfo::NONE,
            timestamp: Timestamp::from_nanos(ts),
            key,
            value: 0,
        })
    }
}

impl SampleData for TestSample {
    type Value = KeyedValue;
    type Key = u32;

    fn kind(&self) -> SampleKind {
        self.kind
    }

    fn status_info(&self) -> StatusInfo {
        self.status
    }

    fn source_timestamp(&self) -> Timestamp {
        self.timestamp
    }

    fn key(&self) -> u32 {
        self.key
    }

    fn to_value(&self) -> KeyedValue {
        KeyedValue {
            key: self.key,
            value: self.value,
        }
    }

    fn key_value(&self) -> KeyedValue {
        KeyedValue {
            key: self.key,
            value: 0,
        }
    }
}

/// Writer metadata with a GUID ordered by `n` (higher n, higher GUID).
pub fn writer(n: u64) -> WriterInfo {
    let mut prefix = [0u8; 12];
    prefix[4..12].copy_from_slice(&n.to_be_bytes());
    WriterInfo::new(WriterId(n), Guid::new(prefix, [0, 0, 0, 7]))
}

/// Listener that records everything it is told.
#[derive(Default)]
pub struct RecordingListener {
    pub data_available: AtomicU32,
    pub lost: Mutex<Vec<SampleLostStatus>>,
    pub rejected: Mutex<Vec<SampleRejectedStatus>>,
    pub deadline_missed: Mutex<Vec<RequestedDeadlineMissedStatus>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn data_available_count(&self) -> u32 {
        self.data_available.load(Ordering::SeqCst)
    }
}

impl ReaderListener for RecordingListener {
    fn on_data_available(&self) {
        self.data_available.fetch_add(1, Ordering::SeqCst);
    }

    fn on_sample_lost(&self, status: SampleLostStatus) {
        self.lost.lock().unwrap().push(status);
    }

    fn on_sample_rejected(&self, status: SampleRejectedStatus) {
        self.rejected.lock().unwrap().push(status);
    }

    fn on_requested_deadline_missed(&self, status: RequestedDeadlineMissedStatus) {
        self.deadline_missed.lock().unwrap().push(status);
    }
}

/// Manually advanced monotonic clock.
#[derive(Default)]
pub struct ManualClock(AtomicU64);

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, ns: u64) {
        self.0.store(ns, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ns(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}
