// SPDX-FileCopyrightText: 2024 Sean Cross <sean@xobs.io>
// SPDX-License-Identifier: Apache-2.0

//! Backing-page collaborator traits.
//!
//! The page allocator is an external collaborator: it supplies and
//! reclaims backing pages but is not part of the Fragment subsystem
//! itself. Real page backing -- mmap'd regions, a
//! region-based heap allocator, whatever the embedding collector uses --
//! lives on the other side of this trait boundary.

use crate::color::RawOffset;
use crate::config::PageSizeClass;
use crate::error::Result;

/// A single backing page, fixed-size and granule-aligned.
pub trait Page: Send + Sync {
    /// Start of the page in the address-offset space.
    fn start(&self) -> RawOffset;

    /// Size of the page in bytes.
    fn size(&self) -> usize;

    /// Current bump-pointer position, relative to the start of the
    /// address-offset space (i.e. an absolute [`RawOffset`], not a
    /// page-relative delta).
    fn top(&self) -> RawOffset;

    /// Bump-allocate `bytes` at the current top, returning the offset at
    /// which the object begins. The destination page is "owned" by the
    /// populator during layout: callers never need to
    /// synchronise with concurrent allocators on the same page.
    fn alloc_object(&self, bytes: usize) -> Option<RawOffset>;

    /// Whether `offset` falls within `[start, start + size)`.
    fn is_in(&self, offset: RawOffset) -> bool {
        let start = self.start().get();
        let end = start + self.size() as u64;
        offset.get() >= start && offset.get() < end
    }

    /// Per-page object alignment, expressed as a power-of-two shift.
    fn object_alignment_shift(&self) -> u32;
}

/// Supplied by the (out-of-scope) page subsystem: allocates and reclaims
/// backing pages. May block: destination-page allocation during
/// population is allowed to wait on the allocator.
pub trait PageAllocator {
    type PageHandle: Page;

    /// Allocate a page of the given size class. Returns
    /// [`crate::error::Error::OutOfMemory`] rather than blocking forever;
    /// the embedder is expected to have pre-reserved enough destination
    /// pages before relocation starts.
    fn alloc_page(&self, class: PageSizeClass) -> Result<Self::PageHandle>;

    /// Return a page to the allocator. `reclaimed` indicates whether the
    /// page's prior contents are known-dead (a relocated source page) as
    /// opposed to merely being given up unused.
    fn free_page(&self, page: Self::PageHandle, reclaimed: bool);
}
