// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! OWNERSHIP QoS policy (DDS v1.4 Sec.2.2.3.9)
//!
//! With EXCLUSIVE ownership only one writer may update an instance at a
//! time: the one with the highest strength. Lower-strength writers are
//! filtered; equal strength falls back to a GUID tiebreak. Ownership is up
//! for grabs again when the owning writer unregisters or loses liveliness.

/// OWNERSHIP QoS policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Ownership {
    /// Any writer may update any instance.
    #[default]
    Shared,
    /// Highest-strength writer owns each instance.
    Exclusive,
}

impl Ownership {
    /// Whether exclusive arbitration is selected.
    pub fn is_exclusive(&self) -> bool {
        matches!(self, Ownership::Exclusive)
    }
}
