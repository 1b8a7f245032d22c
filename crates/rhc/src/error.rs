// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Errors returned by cache operations.
//!
//! Filter drops and limit-driven store refusals are *not* errors — they
//! surface as reader statuses and through `store()`'s boolean. The error
//! type covers misuse of the API surface itself.

/// Errors returned by reader-history-cache operations.
#[derive(Debug)]
pub enum Error {
    /// QoS profile failed validation (e.g. zero history depth).
    InvalidQos(String),
    /// Operation named an instance handle unknown to this cache.
    PreconditionNotMet,
    /// All 64 query-condition bit slots are taken.
    ConditionSlotsExhausted,
    /// Condition is already attached to this cache.
    AlreadyAttached,
    /// A query condition must be attached before it can filter read/take.
    ConditionNotAttached,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidQos(msg) => write!(f, "Invalid QoS: {}", msg),
            Error::PreconditionNotMet => write!(f, "Unknown instance handle"),
            Error::ConditionSlotsExhausted => {
                write!(f, "No free query-condition slots (max 64 per reader)")
            }
            Error::AlreadyAttached => write!(f, "Condition already attached"),
            Error::ConditionNotAttached => write!(f, "Condition not attached to this cache"),
        }
    }
}

impl std::error::Error for Error {}

/// Convenient alias for API results using the public `Error` type.
pub type Result<T> = core::result::Result<T, Error>;
