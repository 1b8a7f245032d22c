// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The serialized-sample contract and per-sample metadata.
//!
//! The cache never looks inside a sample. It sees an opaque, ref-counted
//! handle ([`SampleData`] behind an `Arc`) carrying a kind, a status-info
//! bitset and a source timestamp, and it deserializes on demand: the full
//! value for content evaluation and delivery, the key-only projection for
//! synthesized invalid samples.

use crate::guid::Guid;
use crate::time::Timestamp;
use std::fmt;
use std::hash::Hash;

/// Unique 64-bit instance identifier, assigned by the key map.
///
/// Approximately uniformly drawn from the positive 64-bit range, so it is
/// used directly as a hash key and doubles as the instance handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(pub u64);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// Unique 64-bit writer identifier, same id space as [`InstanceId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WriterId(pub u64);

impl WriterId {
    /// Placeholder for "no writer".
    pub const NONE: WriterId = WriterId(0);
}

impl fmt::Display for WriterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// Payload kind of an incoming sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    /// Full data sample.
    Data,
    /// Key-only sample (dispose/unregister carrier).
    Key,
}

/// Protocol status-info bits accompanying a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusInfo(u32);

impl StatusInfo {
    /// No status bits set.
    pub const NONE: StatusInfo = StatusInfo(0);
    /// Writer disposed the instance.
    pub const DISPOSE: StatusInfo = StatusInfo(1);
    /// Writer unregistered the instance.
    pub const UNREGISTER: StatusInfo = StatusInfo(2);

    /// Create from raw bits.
    pub const fn from_bits(bits: u32) -> Self {
        StatusInfo(bits)
    }

    /// Raw bits.
    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// Whether the dispose bit is set.
    pub const fn is_dispose(&self) -> bool {
        self.0 & Self::DISPOSE.0 != 0
    }

    /// Whether the unregister bit is set.
    pub const fn is_unregister(&self) -> bool {
        self.0 & Self::UNREGISTER.0 != 0
    }

    /// Whether no bits are set.
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for StatusInfo {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        StatusInfo(self.0 | rhs.0)
    }
}

/// Contract between the cache and the topic-type layer.
///
/// Implementations wrap whatever serialized representation the transport
/// delivers. The cache holds one `Arc` clone per stored sample; dropping the
/// cache (or taking the sample) releases it.
pub trait SampleData: Send + Sync + 'static {
    /// Deserialized form, handed to applications and content predicates.
    type Value: Send + Sync + 'static;

    /// Key type for the instance-key map.
    type Key: Clone + Eq + Hash + Send + Sync + 'static;

    /// Payload kind.
    fn kind(&self) -> SampleKind;

    /// Status-info bits (dispose/unregister).
    fn status_info(&self) -> StatusInfo;

    /// Source timestamp, possibly [`Timestamp::INVALID`].
    fn source_timestamp(&self) -> Timestamp;

    /// Key value, used by the key map to identify the instance.
    fn key(&self) -> Self::Key;

    /// Deserialize the full sample.
    fn to_value(&self) -> Self::Value;

    /// Deserialize the key-only projection with all non-key fields
    /// defaulted. Used for synthesized invalid samples and key-level
    /// predicate evaluation.
    fn key_value(&self) -> Self::Value;
}

/// Metadata describing the writer a sample came from.
///
/// Delivered by discovery alongside each sample; snapshotted into the
/// instance on acceptance.
#[derive(Debug, Clone)]
pub struct WriterInfo {
    /// Unique writer id.
    pub iid: WriterId,
    /// Writer GUID, used for ordering and ownership tiebreaks.
    pub guid: Guid,
    /// Ownership strength (EXCLUSIVE ownership arbitration).
    pub ownership_strength: i32,
    /// Whether the writer auto-disposes instances it unregisters.
    pub auto_dispose: bool,
    /// Absolute monotonic expiry for this sample's lifespan, if any.
    pub lifespan_expiry: Option<u64>,
}

impl WriterInfo {
    /// Writer info with default QoS (shared ownership, no auto-dispose,
    /// unlimited lifespan).
    pub fn new(iid: WriterId, guid: Guid) -> Self {
        Self {
            iid,
            guid,
            ownership_strength: 0,
            auto_dispose: false,
            lifespan_expiry: None,
        }
    }
}

/// Sample state: READ once returned by read/take, NOT_READ until then.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleState {
    /// Sample has been accessed via `read()`.
    Read,
    /// Sample has not been read yet.
    NotRead,
}

/// View state of the instance a sample belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewState {
    /// First sample ever, or resurrection from not-alive.
    New,
    /// Seen before.
    NotNew,
}

/// Instance liveliness state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    /// Live writers exist and the instance is not disposed.
    Alive,
    /// Last protocol event was a dispose.
    NotAliveDisposed,
    /// No registered writers remain.
    NotAliveNoWriters,
}

/// Per-sample metadata synthesized by read/take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleInfo {
    /// READ / NOT_READ.
    pub sample_state: SampleState,
    /// NEW / NOT_NEW.
    pub view_state: ViewState,
    /// ALIVE / NOT_ALIVE_DISPOSED / NOT_ALIVE_NO_WRITERS.
    pub instance_state: InstanceState,
    /// False for synthesized invalid samples; their data is the key
    /// projection only.
    pub valid_data: bool,
    /// Source timestamp of the sample (instance's last update for invalid
    /// samples).
    pub source_timestamp: Timestamp,
    /// Handle of the instance the sample belongs to.
    pub instance_handle: InstanceId,
    /// Id of the writer that produced the sample.
    pub publication_handle: WriterId,
    /// Instance dispose-generation at insertion time.
    pub disposed_generation_count: u32,
    /// Instance no-writers-generation at insertion time.
    pub no_writers_generation_count: u32,
    /// Samples of the same instance following this one in the returned set.
    pub sample_rank: u32,
    /// Generation distance to the last returned sample of this instance.
    pub generation_rank: u32,
    /// Generation distance to the instance's current generation.
    pub absolute_generation_rank: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_info_bits() {
        let si = StatusInfo::DISPOSE | StatusInfo::UNREGISTER;
        assert!(si.is_dispose());
        assert!(si.is_unregister());
        assert!(!si.is_empty());
        assert!(StatusInfo::NONE.is_empty());
        assert_eq!(StatusInfo::from_bits(3), si);
    }
}
