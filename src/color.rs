// SPDX-FileCopyrightText: 2024 Sean Cross <sean@xobs.io>
// SPDX-License-Identifier: Apache-2.0

//! Address representations.
//!
//! A [`ColouredAddress`] is what the load barrier hands the core: a raw
//! offset with metadata bits ORed in. The core never interprets those bits
//! -- it strips them via [`AddressColoring::strip`] to get a [`RawOffset`],
//! does all of its arithmetic there, and re-colors the result via
//! [`AddressColoring::color`] before returning to the caller. The coloring
//! scheme itself is not this crate's concern.

/// A 64-bit offset into the collector's single address-offset space, with
/// color metadata stripped. All Fragment arithmetic operates on these.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RawOffset(pub u64);

impl RawOffset {
    pub const fn new(offset: u64) -> Self { RawOffset(offset) }

    pub const fn get(self) -> u64 { self.0 }

    pub const fn add(self, delta: u64) -> Self { RawOffset(self.0 + delta) }

    pub const fn sub(self, other: RawOffset) -> u64 { self.0 - other.0 }
}

/// An address as seen by a mutator through the load barrier: a raw offset
/// with coloring metadata mixed in. The Fragment subsystem treats this as
/// opaque and round-trips it through [`AddressColoring`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ColouredAddress(pub u64);

impl ColouredAddress {
    pub const fn new(raw: u64) -> Self { ColouredAddress(raw) }
}

/// Supplied by the (out-of-scope) address-coloring load barrier.
pub trait AddressColoring {
    /// Strip color metadata, returning the raw offset usable for
    /// arithmetic within the address-offset space.
    fn strip(&self, addr: ColouredAddress) -> RawOffset;

    /// Re-apply whatever color metadata the caller's view of the address
    /// expects.
    fn color(&self, offset: RawOffset) -> ColouredAddress;
}

/// A coloring scheme that carries no metadata at all. Useful for tests and
/// for embedders that do not implement a colored-pointer barrier.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityColoring;

impl AddressColoring for IdentityColoring {
    fn strip(&self, addr: ColouredAddress) -> RawOffset { RawOffset(addr.0) }

    fn color(&self, offset: RawOffset) -> ColouredAddress { ColouredAddress(offset.0) }
}
