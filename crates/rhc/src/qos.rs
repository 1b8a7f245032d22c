// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

/// QoS (Quality of Service) policies consumed by the reader history cache.
///
/// Only the read-side policies live here: how much history to keep, which
/// resource ceilings apply, how arriving samples are ordered, filtered and
/// arbitrated between writers, and the deadline period to supervise.
/// Deadline QoS policy - expected data update period.
pub mod deadline;
/// Destination order QoS policy - reception vs source timestamp ordering.
pub mod destination_order;
/// Ownership QoS policy - exclusive vs shared writers.
pub mod ownership;
/// Time-based filter QoS policy - minimum sample separation.
pub mod time_based_filter;

pub use deadline::Deadline;
pub use destination_order::DestinationOrder;
pub use ownership::Ownership;
pub use time_based_filter::TimeBasedFilter;

/// Reliability policy
///
/// Determines delivery guarantees for samples. The cache only needs the
/// kind: a reliable reader reports resource rejections back to the
/// transport so it can retry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Reliability {
    /// Fire-and-forget (no ACKs, no retransmission)
    #[default]
    BestEffort,
    /// Reliable delivery; rejected stores are retried by the transport.
    Reliable,
}

/// History policy
///
/// Determines how many samples to keep per instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum History {
    /// Keep last N samples per instance (oldest overwritten on arrival)
    KeepLast(u32),
    /// Keep all samples within resource limits.
    ///
    /// Inserts fail once the limits are reached.
    KeepAll,
}

impl History {
    /// Effective per-instance depth: `u32::MAX` for KeepAll.
    pub fn depth(&self) -> u32 {
        match self {
            History::KeepLast(n) => *n,
            History::KeepAll => u32::MAX,
        }
    }
}

impl Default for History {
    fn default() -> Self {
        Self::KeepLast(1)
    }
}

/// Resource limits for the reader cache
///
/// `UNLIMITED` disables a ceiling. Limits apply to valid samples only;
/// synthesized invalid samples are bounded structurally (at most one per
/// instance).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Maximum total samples across all instances
    pub max_samples: usize,
    /// Maximum number of instances
    pub max_instances: usize,
    /// Maximum samples per single instance
    pub max_samples_per_instance: usize,
}

impl ResourceLimits {
    /// Disables a limit.
    pub const UNLIMITED: usize = usize::MAX;
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_samples: Self::UNLIMITED,
            max_instances: Self::UNLIMITED,
            max_samples_per_instance: Self::UNLIMITED,
        }
    }
}

/// QoS profile for a reader history cache
///
/// Validated at cache creation (fail-fast on invalid config).
///
/// # Examples
///
/// ```
/// use rhc::qos::{History, ReaderQos, ResourceLimits};
///
/// let qos = ReaderQos {
///     history: History::KeepLast(8),
///     resource_limits: ResourceLimits {
///         max_instances: 64,
///         ..Default::default()
///     },
///     ..Default::default()
/// };
/// assert!(qos.validate().is_ok());
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReaderQos {
    /// Reliability policy
    pub reliability: Reliability,
    /// History policy (KeepLast or KeepAll)
    pub history: History,
    /// Resource limits (sample and instance ceilings)
    pub resource_limits: ResourceLimits,
    /// Destination order (reception vs source timestamp)
    pub destination_order: DestinationOrder,
    /// Ownership arbitration (shared vs exclusive)
    pub ownership: Ownership,
    /// Time-based filter (minimum separation between accepted samples)
    pub time_based_filter: TimeBasedFilter,
    /// Deadline supervision period
    pub deadline: Deadline,
}

impl ReaderQos {
    /// Validate the profile.
    ///
    /// # Validation Rules
    ///
    /// - `History::KeepLast(n)` requires `n > 0`
    /// - `max_samples >= max_samples_per_instance` when both are bounded
    pub fn validate(&self) -> Result<(), String> {
        if let History::KeepLast(0) = self.history {
            return Err("History::KeepLast(n) requires n > 0".to_string());
        }
        let rl = &self.resource_limits;
        if rl.max_samples < rl.max_samples_per_instance
            && rl.max_samples != ResourceLimits::UNLIMITED
            && rl.max_samples_per_instance != ResourceLimits::UNLIMITED
        {
            return Err(format!(
                "max_samples ({}) must be >= max_samples_per_instance ({})",
                rl.max_samples, rl.max_samples_per_instance
            ));
        }
        Ok(())
    }
}
