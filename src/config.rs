// SPDX-FileCopyrightText: 2024 Sean Cross <sean@xobs.io>
// SPDX-License-Identifier: Apache-2.0

//! Size-class and alignment constants for the Fragment subsystem.
//!
//! These mirror the constants a host collector would otherwise bake into
//! a `zGlobals.hpp`-equivalent header: granule size, the fixed 256-byte
//! entry span, and the two relocatable page-size classes.

/// Alignment unit for pages and offsets.
pub const GRANULE_SIZE: usize = 2 * 1024 * 1024;

/// Number of source bytes summarised by a single [`crate::fragment_entry::FragmentEntry`].
pub const ENTRY_SPAN_BYTES: usize = 256;

/// Number of 8-byte words covered by one [`crate::fragment_entry::FragmentEntry`].
pub const ENTRY_SPAN_WORDS: usize = ENTRY_SPAN_BYTES / 8;

/// Small page size: one granule.
pub const SMALL_PAGE_SIZE: usize = GRANULE_SIZE;

/// Medium page size: a small multiple of the granule.
pub const MEDIUM_PAGE_SIZE: usize = 16 * GRANULE_SIZE;

/// Size of the address-offset space the [`crate::fragment_table::FragmentTable`]
/// indexes over. Configurable per collector instance; the default is large
/// enough to back a multi-terabyte address-offset space at granule
/// granularity without the caller needing to size it by hand in tests.
pub const DEFAULT_OFFSET_MAX: usize = 1usize << 40;

/// Relocatable page size classes. Large pages are never relocated and are
/// out of scope for this subsystem.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PageSizeClass {
    Small,
    Medium,
}

impl PageSizeClass {
    pub const fn byte_size(self) -> usize {
        match self {
            PageSizeClass::Small => SMALL_PAGE_SIZE,
            PageSizeClass::Medium => MEDIUM_PAGE_SIZE,
        }
    }
}

/// Arithmetic constants shared by every [`crate::fragment::Fragment`] and the
/// [`crate::fragment_table::FragmentTable`] created under one collector
/// instance. Policy (which pages to relocate, how many workers to run) is
/// deliberately not modeled here -- that is the embedder's responsibility.
#[derive(Debug, Clone, Copy)]
pub struct GcConfig {
    pub granule_size: usize,
    pub entry_span_bytes: usize,
    pub offset_max: usize,
}

impl GcConfig {
    pub const fn new(granule_size: usize, entry_span_bytes: usize, offset_max: usize) -> Self {
        GcConfig { granule_size, entry_span_bytes, offset_max }
    }

    pub const fn granule_shift(&self) -> u32 { self.granule_size.trailing_zeros() }
}

impl Default for GcConfig {
    fn default() -> Self {
        GcConfig::new(GRANULE_SIZE, ENTRY_SPAN_BYTES, DEFAULT_OFFSET_MAX)
    }
}
