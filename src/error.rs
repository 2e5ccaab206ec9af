// SPDX-FileCopyrightText: 2024 Sean Cross <sean@xobs.io>
// SPDX-License-Identifier: Apache-2.0

//! Crate-local error type.
//!
//! Internal invariant violations (a double-set liveness bit, a prefix-sum
//! mismatch, a rewritten `copied` flag) are fatal by construction and are
//! raised as `debug_assert!`/`panic!` on the hot path rather than through
//! this enum -- the core is meant to be correct by construction in release
//! builds, not recoverable. `Error` covers the handful of paths that a
//! caller can reasonably act on.

use core::fmt;

#[derive(Debug)]
pub enum Error {
    /// `Fragment::retain` was called after the refcount had already
    /// reached zero. The caller must treat this as "the fragment is gone"
    /// and fall through to the forwarded address via the load barrier.
    RetainAfterRelease,
    /// Destination page allocation failed during population. Destination
    /// pages are expected to be pre-reserved before relocation starts; this
    /// crate surfaces the failure rather than silently falling back to
    /// in-place relocation.
    OutOfMemory,
    /// A populator-time bookkeeping check failed (only raised when the
    /// `debug-relocate` feature is enabled). Carries a short description
    /// of the failing invariant.
    InvariantViolation(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::RetainAfterRelease => write!(f, "retain() called on a decommissioned fragment"),
            Error::OutOfMemory => write!(f, "out of memory allocating a destination page"),
            Error::InvariantViolation(msg) => write!(f, "invariant violation: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = core::result::Result<T, Error>;
