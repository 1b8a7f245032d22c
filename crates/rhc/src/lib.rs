// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reader history cache for DDS data readers.
//!
//! This crate is the data structure that sits between a protocol receive
//! path and the application's read/take API: it stores deserialized-on-
//! demand samples per key-value instance, runs the DDS state machines
//! (sample, view and instance state), arbitrates writers under exclusive
//! ownership, enforces history depth and resource limits, evaluates read
//! and query conditions incrementally, and supervises lifespan expiry and
//! reception deadlines.
//!
//! It is purely local state management: no sockets, no discovery, no type
//! system. The surrounding system supplies samples through the
//! [`SampleData`] contract, instance identity through [`KeyMap`], and a
//! timer loop that drives the expiry/deadline hooks.
//!
//! # Overview
//!
//! ```text
//!   protocol rx ──store()──► ReaderHistoryCache ──read()/take()──► app
//!                                │        ▲
//!                        statuses▼        │ triggers
//!                          ReaderListener WaitSet/ReadCondition
//! ```
//!
//! # Example
//!
//! ```ignore
//! use rhc::{KeyMap, ReaderHistoryCache, ReaderQos, StateMask, WriterInfo};
//!
//! let cache = ReaderHistoryCache::new(ReaderQos::default())?;
//! let keymap = KeyMap::new();
//!
//! // receive path: writer metadata + serialized sample + key instance
//! let key = keymap.instance(&sample);
//! cache.store(&writer_info, sample, &key);
//!
//! // application: drain everything
//! for (info, value) in cache.take(64, StateMask::ANY, None, None)? {
//!     if info.valid_data {
//!         process(value);
//!     }
//! }
//! ```

mod cache;
mod condition;
mod error;
mod guid;
mod keymap;
mod sample;
mod status;
mod time;
mod waitset;

/// QoS policies consumed by the cache.
pub mod qos;

pub use cache::ReaderHistoryCache;
pub use condition::{Condition, ReadCondition, SamplePredicate, StateMask};
pub use error::{Error, Result};
pub use guid::Guid;
pub use keymap::{KeyInstance, KeyMap};
pub use qos::ReaderQos;
pub use sample::{
    InstanceId, InstanceState, SampleData, SampleInfo, SampleKind, SampleState, StatusInfo,
    ViewState, WriterId, WriterInfo,
};
pub use status::{
    ReaderListener, RequestedDeadlineMissedStatus, SampleLostStatus, SampleRejectedReason,
    SampleRejectedStatus,
};
pub use time::{Clock, MonotonicClock, Timestamp};
pub use waitset::{WaitSet, WaitsetSignal};
