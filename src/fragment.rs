// SPDX-FileCopyrightText: 2024 Sean Cross <sean@xobs.io>
// SPDX-License-Identifier: Apache-2.0

//! `Fragment`: the per-source-page relocation descriptor.
//!
//! A Fragment owns its source page exclusively while its refcount is
//! nonzero, holds non-owning handles to one or two destination pages, and
//! carries the fixed-width [`FragmentEntry`] array that everything else in
//! this subsystem reads. Its lifecycle -- `New -> Populating -> Active ->
//! Decommissioned` -- is enforced by API shape: population methods take
//! `&mut self` (a single populating thread has exclusive access), while
//! the Active phase exposes only `&self` methods backed by atomics, so a
//! Fragment can only be read concurrently once its construction has fully
//! happened-before every reader.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::color::RawOffset;
use crate::config::{GcConfig, ENTRY_SPAN_BYTES};
use crate::error::{Error, Result};
use crate::fragment_entry::{FragmentEntry, WORDS_PER_ENTRY};
use crate::page::{Page, PageAllocator};

#[cfg(debug_assertions)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum FragmentState {
    New = 0,
    Populating = 1,
    Active = 2,
    Decommissioned = 3,
}

/// The offset (and its entry/internal-index decomposition) at which a
/// Fragment's destination switches from the primary to the secondary
/// destination page. Cached once at installation time.
#[derive(Debug, Clone, Copy)]
struct PageBreak {
    offset: RawOffset,
    entry_index: usize,
    internal_index: u32,
}

pub struct Fragment<P: Page + Clone> {
    old_page: P,
    old_start: RawOffset,
    old_size: usize,
    #[allow(dead_code)]
    object_alignment_shift: u32,
    entries: Box<[FragmentEntry]>,
    /// `carry_into[i]` is true when entry `i` opens mid-object -- its
    /// first live bit (if any) closes an object whose start lies in an
    /// earlier entry, rather than beginning a new one. Computed once by
    /// the populator from the full live-bit pattern so that `to_offset`
    /// stays an O(1), lock-free, per-entry computation instead of an
    /// unbounded backward walk -- see DESIGN.md.
    carry_into: Box<[bool]>,
    new_page_primary: P,
    new_page_secondary: Option<P>,
    page_break: Option<PageBreak>,
    refcount: AtomicU32,
    pinned: AtomicBool,
    #[cfg(debug_assertions)]
    state: core::sync::atomic::AtomicU8,
}

impl<P: Page + Clone> Fragment<P> {
    /// Allocates a Fragment covering all of `old_page`, with `refcount`
    /// initialised to 1: create counts as the first retain, so
    /// [`crate::fragment_table::FragmentTable::insert`] does not need to
    /// retain again. The caller must populate the Fragment (via
    /// [`crate::populator::populate`]) before publishing it into a
    /// [`crate::fragment_table::FragmentTable`].
    pub fn create(old_page: P, new_page_primary: P, config: &GcConfig) -> Self {
        debug_assert_eq!(config.entry_span_bytes, ENTRY_SPAN_BYTES, "entry span is fixed at 256 bytes");
        let old_start = old_page.start();
        let old_size = old_page.size();
        let object_alignment_shift = old_page.object_alignment_shift();
        let entry_count = (old_size + ENTRY_SPAN_BYTES - 1) / ENTRY_SPAN_BYTES;
        let entries = (0..entry_count).map(|_| FragmentEntry::new()).collect::<Vec<_>>().into_boxed_slice();
        let carry_into = vec![false; entry_count].into_boxed_slice();
        log::trace!("fragment created: old_start={:#x}, {} entries", old_start.get(), entry_count);
        Fragment {
            old_page,
            old_start,
            old_size,
            object_alignment_shift,
            entries,
            carry_into,
            new_page_primary,
            new_page_secondary: None,
            page_break: None,
            refcount: AtomicU32::new(1),
            pinned: AtomicBool::new(false),
            #[cfg(debug_assertions)]
            state: core::sync::atomic::AtomicU8::new(FragmentState::New as u8),
        }
    }

    pub fn old_start(&self) -> RawOffset { self.old_start }

    pub fn old_size(&self) -> usize { self.old_size }

    pub fn old_page(&self) -> &P { &self.old_page }

    pub fn entries(&self) -> &[FragmentEntry] { &self.entries }

    pub fn new_page_primary(&self) -> &P { &self.new_page_primary }

    #[cfg(debug_assertions)]
    fn mark_populating(&self) {
        self.state.store(FragmentState::Populating as u8, Ordering::Relaxed);
    }

    #[cfg(debug_assertions)]
    pub(crate) fn mark_active(&self) {
        self.state.store(FragmentState::Active as u8, Ordering::Release);
        log::debug!("fragment old_start={:#x}: active", self.old_start.get());
    }

    #[cfg(not(debug_assertions))]
    pub(crate) fn mark_active(&self) {
        log::debug!("fragment old_start={:#x}: active", self.old_start.get());
    }

    // -- source <-> destination arithmetic --

    pub fn offset_to_index(&self, o: RawOffset) -> usize {
        (o.sub(self.old_start) as usize) / ENTRY_SPAN_BYTES
    }

    pub fn offset_to_internal(&self, o: RawOffset) -> u32 {
        (((o.sub(self.old_start)) / 8) % WORDS_PER_ENTRY as u64) as u32
    }

    pub fn from_offset(&self, entry_index: usize, internal_index: u32) -> RawOffset {
        self.old_start.add((entry_index * ENTRY_SPAN_BYTES) as u64 + (internal_index as u64) * 8)
    }

    pub fn find(&self, o: RawOffset) -> &FragmentEntry { &self.entries[self.offset_to_index(o)] }

    /// Installs a page break: every live object at or after
    /// `first_offset_on_secondary` is destined for `secondary`; everything
    /// earlier stays on the primary page. Called exactly once per
    /// Fragment, during population, before publish.
    pub(crate) fn add_page_break(&mut self, secondary: P, first_offset_on_secondary: RawOffset) {
        debug_assert!(self.page_break.is_none(), "add_page_break called twice");
        let entry_index = self.offset_to_index(first_offset_on_secondary);
        let internal_index = self.offset_to_internal(first_offset_on_secondary);
        self.page_break = Some(PageBreak { offset: first_offset_on_secondary, entry_index, internal_index });
        self.new_page_secondary = Some(secondary);
    }

    pub fn page_break_offset(&self) -> Option<RawOffset> { self.page_break.map(|b| b.offset) }

    /// The destination page a given source offset is headed for.
    pub fn destination_page(&self, o: RawOffset) -> &P {
        match &self.page_break {
            Some(pb) if o.get() >= pb.offset.get() => {
                self.new_page_secondary.as_ref().expect("page break set without a secondary page")
            }
            _ => &self.new_page_primary,
        }
    }

    /// Returns the destination raw offset at which the live object
    /// starting at `from_offset` already has been, or will be, placed.
    /// Pure function of pre-populated Fragment state: callable by many
    /// threads concurrently without synchronisation.
    pub fn to_offset(&self, from_offset: RawOffset) -> RawOffset {
        let entry_index = self.offset_to_index(from_offset);
        let internal_index = self.offset_to_internal(from_offset);
        let entry = &self.entries[entry_index];

        // Correction: the entry straddling the break stores a prefix
        // computed against the primary page (from objects earlier in the
        // fragment that landed there). Every object in that same entry at
        // or after the break's internal index is destined for the
        // secondary page instead and starts a fresh prefix there, so the
        // stored value must not be added for them.
        let on_secondary_side_of_break = self
            .page_break
            .map(|pb| entry_index == pb.entry_index && internal_index >= pb.internal_index)
            .unwrap_or(false);
        let prefix = if on_secondary_side_of_break { 0 } else { entry.live_bytes_prefix() };

        let carry_in = self.carry_into[entry_index];
        let (local_bytes, _) = entry.live_bytes_on_fragment(internal_index, carry_in);

        let dest = self.destination_page(from_offset);
        dest.start().add(prefix as u64 + local_bytes as u64)
    }

    // -- refcount protocol --

    /// CAS-increments the refcount, but only while it is nonzero. Fails
    /// (no increment performed) if the Fragment has already been
    /// decommissioned -- this is what prevents a retain from resurrecting
    /// a Fragment whose source page has already been handed back.
    pub fn retain(&self) -> Result<()> {
        let mut current = self.refcount.load(Ordering::Relaxed);
        loop {
            if current == 0 {
                return Err(Error::RetainAfterRelease);
            }
            match self.refcount.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(()),
                Err(observed) => current = observed,
            }
        }
    }

    /// Decrements the refcount. If it reaches zero, hands `old_page` back
    /// to `allocator` -- this is the unique point at which the source
    /// page is released.
    pub fn release<A>(&self, allocator: &A)
    where
        A: PageAllocator<PageHandle = P>,
    {
        let prev = self.refcount.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "release() called on an already-decommissioned fragment");
        if prev == 1 {
            #[cfg(debug_assertions)]
            self.state.store(FragmentState::Decommissioned as u8, Ordering::Release);
            log::debug!("fragment old_start={:#x}: decommissioned, source page released", self.old_start.get());
            allocator.free_page(self.old_page.clone(), true);
        }
    }

    pub fn is_pinned(&self) -> bool { self.pinned.load(Ordering::Acquire) }

    /// Marks the Fragment as requiring in-place relocation, forcing the
    /// source page to stay mapped for the rest of the GC cycle. Never
    /// triggered automatically by this crate -- see DESIGN.md; exposed so
    /// an embedder's barrier can honour it.
    pub fn set_pinned(&self) { self.pinned.store(true, Ordering::Release); }
}

/// Populator-only API: filling entries and finalising the carry table.
/// Kept behind `pub(crate)` so only [`crate::populator::populate`]
/// mutates a Fragment between `create` and publish.
impl<P: Page + Clone> Fragment<P> {
    pub(crate) fn begin_populating(&self) {
        log::debug!("fragment old_start={:#x}: begin populating", self.old_start.get());
        #[cfg(debug_assertions)]
        self.mark_populating();
    }

    /// Whether entry `i` opens mid-object, per the table
    /// [`Self::finalize_carry_table`] computed. Used by the populator's
    /// debug-only live-byte self-check.
    pub(crate) fn carries_into(&self, i: usize) -> bool { self.carry_into[i] }

    /// Computes, for every entry, whether it opens mid-object (its first
    /// live bit, if any, closes an object whose start is in an earlier
    /// entry). Must run after every `set_liveness`/`set_size_bit` call has
    /// landed and before the Fragment is shared across threads.
    pub(crate) fn finalize_carry_table(&mut self) {
        let mut carrying = false;
        for i in 0..self.entries.len() {
            self.carry_into[i] = carrying;
            let entry = &self.entries[i];
            let (_, carry_out) = entry.live_bytes_on_fragment(WORDS_PER_ENTRY, carrying);
            carrying = carry_out;
        }
    }
}
