// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reader status structures and the listener callback trait.
//!
//! The cache raises statuses, it does not decide what to do with them: the
//! owning reader entity gets a callback after the cache lock is released and
//! forwards to the application (listener, status condition, logging).
//!
//! # Thread Safety
//!
//! Listeners are called from whatever thread drove the cache operation
//! (receive path, application read, timer loop). They must be `Send + Sync`
//! and should not block or panic.

use crate::sample::InstanceId;

/// Status information for sample lost events.
///
/// Raised when an arriving sample is dropped by an acceptance filter
/// (ordering, time-based filter, ownership, content).
#[derive(Debug, Clone, Copy, Default)]
pub struct SampleLostStatus {
    /// Total cumulative count of lost samples.
    pub total_count: u32,
    /// Change in total_count since last callback.
    pub total_count_change: i32,
}

/// Reason why a sample was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleRejectedReason {
    /// Sample was not rejected.
    #[default]
    NotRejected,
    /// ResourceLimits.max_instances reached.
    ByInstancesLimit,
    /// ResourceLimits.max_samples reached.
    BySamplesLimit,
    /// ResourceLimits.max_samples_per_instance reached.
    BySamplesPerInstanceLimit,
}

/// Status information for sample rejected events.
///
/// Raised when a sample is refused because a resource limit was hit.
#[derive(Debug, Clone, Copy, Default)]
pub struct SampleRejectedStatus {
    /// Total cumulative count of rejected samples.
    pub total_count: u32,
    /// Change in total_count since last callback.
    pub total_count_change: i32,
    /// Reason for the last rejection.
    pub last_reason: SampleRejectedReason,
    /// Instance the last rejected sample belonged to.
    pub last_instance_handle: Option<InstanceId>,
}

/// Status information for missed reception deadlines.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestedDeadlineMissedStatus {
    /// Total cumulative count of missed deadline periods.
    pub total_count: u32,
    /// Change in total_count since last callback.
    pub total_count_change: i32,
    /// Instance that missed its deadline.
    pub last_instance_handle: Option<InstanceId>,
}

/// Callback interface the cache notifies through.
///
/// All methods have empty default bodies; implement only what you need.
/// Callbacks run with the cache lock released.
pub trait ReaderListener: Send + Sync {
    /// New data (or an instance state change) is available to read.
    fn on_data_available(&self) {}

    /// An arriving sample was dropped by an acceptance filter.
    fn on_sample_lost(&self, _status: SampleLostStatus) {}

    /// An arriving sample was refused due to resource limits.
    fn on_sample_rejected(&self, _status: SampleRejectedStatus) {}

    /// An alive instance saw no update within the deadline period.
    fn on_requested_deadline_missed(&self, _status: RequestedDeadlineMissedStatus) {}
}
