// SPDX-FileCopyrightText: 2024 Sean Cross <sean@xobs.io>
// SPDX-License-Identifier: Apache-2.0

//! LiveMap-driven population of a [`Fragment`]'s entries.
//!
//! Runs once per source page, single-threaded, during the
//! marking-complete phase. Different pages may be populated in parallel
//! by different threads, but one Fragment is only ever touched by one
//! populating thread at a time -- enforced here by `Populator` holding
//! `&mut Fragment`.

use crate::color::AddressColoring;
use crate::config::PageSizeClass;
use crate::error::{Error, Result};
use crate::fragment::Fragment;
use crate::fragment_entry::WORDS_PER_ENTRY;
use crate::live_map::LiveMap;
use crate::object_layout::ObjectLayout;
use crate::page::{Page, PageAllocator};

/// Fills every entry of `fragment` from one pass over `live_map`,
/// assigning destination offsets by packing live objects onto the
/// destination page in order and breaking onto a secondary page the
/// first time one doesn't fit, and freezes the carry table so that
/// later, concurrent calls to [`Fragment::to_offset`] need no further
/// per-query bookkeeping.
///
/// On success the Fragment is left in the `Active` state, ready to be
/// wrapped (typically in an `Arc`) and published into a
/// [`crate::fragment_table::FragmentTable`].
pub fn populate<P, A, M, O, C>(
    fragment: &mut Fragment<P>,
    allocator: &A,
    secondary_class: PageSizeClass,
    live_map: &M,
    object_layout: &O,
    coloring: &C,
) -> Result<()>
where
    P: Page + Clone,
    A: PageAllocator<PageHandle = P>,
    M: LiveMap,
    O: ObjectLayout,
    C: AddressColoring,
{
    fragment.begin_populating();

    let mut current_page = fragment.new_page_primary().clone();
    let mut using_secondary = false;
    let mut dest_bytes_on_current_page: u64 = 0;
    let mut next_unset_entry: usize = 0;
    let old_start = fragment.old_start();

    for rel_offset in live_map.live_offsets() {
        let from_offset = old_start.add(rel_offset as u64);
        let entry_index = fragment.offset_to_index(from_offset);
        let internal_index = fragment.offset_to_internal(from_offset);

        let coloured_from = coloring.color(from_offset);
        let size = object_layout.object_size(coloured_from);
        debug_assert!(size >= 8 && size % 8 == 0, "object size must be a non-zero multiple of 8");

        // Entries passed over before reaching this object's entry get
        // whatever the running total was at the time we reached them --
        // correct whether or not they contain live objects of their own.
        while next_unset_entry <= entry_index {
            let entry_start = fragment.from_offset(next_unset_entry, 0);
            fragment.find(entry_start).set_live_bytes_prefix(dest_bytes_on_current_page as u32);
            next_unset_entry += 1;
        }

        // Try the active destination page; open the secondary page (at
        // most once per Fragment) if the object -- whole, never split --
        // does not fit.
        if current_page.alloc_object(size).is_none() {
            if using_secondary {
                return Err(Error::OutOfMemory);
            }
            let secondary = allocator.alloc_page(secondary_class)?;
            fragment.add_page_break(secondary.clone(), from_offset);
            current_page = secondary;
            using_secondary = true;
            dest_bytes_on_current_page = 0;
            if current_page.alloc_object(size).is_none() {
                return Err(Error::OutOfMemory);
            }
        }

        let entry = fragment.find(from_offset);
        entry.set_liveness(internal_index);
        entry.set_size_bit(internal_index, size);

        // An object whose last word falls outside this entry closes in
        // whichever later entry actually contains that word -- `set_size_bit`
        // only ever looks at its own entry, so the closing bit there has to
        // be set explicitly. Entries strictly between start and close get no
        // liveness bit at all; `finalize_carry_table`'s carried-open flag is
        // what marks them as fully covered by this object.
        let words = (size / 8) as u32;
        let end_local_unmasked = internal_index + words - 1;
        let end_entry_index = entry_index + (end_local_unmasked / WORDS_PER_ENTRY) as usize;
        if end_local_unmasked >= WORDS_PER_ENTRY {
            let end_local = end_local_unmasked % WORDS_PER_ENTRY;
            fragment.entries()[end_entry_index].set_liveness(end_local);
        }

        // None of this object's bytes count as "prefix" for any entry it
        // spans -- they're local bytes of whichever entry's slice they
        // fall in. Entries strictly between the start and the close both
        // get the pre-object running total, same as entry_index did above.
        while next_unset_entry <= end_entry_index {
            let entry_start = fragment.from_offset(next_unset_entry, 0);
            fragment.find(entry_start).set_live_bytes_prefix(dest_bytes_on_current_page as u32);
            next_unset_entry += 1;
        }

        dest_bytes_on_current_page += size as u64;
    }

    // Entries past the last live object still need a terminal prefix so
    // that a query landing in a trailing, fully-dead entry reads a
    // well-defined (if never-consulted) value.
    let total_entries = fragment.entries().len();
    while next_unset_entry < total_entries {
        let entry_start = fragment.from_offset(next_unset_entry, 0);
        fragment.find(entry_start).set_live_bytes_prefix(dest_bytes_on_current_page as u32);
        next_unset_entry += 1;
    }

    fragment.finalize_carry_table();

    #[cfg(feature = "debug-relocate")]
    debug_check_live_bytes(fragment)?;

    fragment.mark_active();
    Ok(())
}

#[cfg(feature = "debug-relocate")]
fn debug_check_live_bytes<P: Page + Clone>(fragment: &Fragment<P>) -> Result<()> {
    let mut total = 0u64;
    for (i, entry) in fragment.entries().iter().enumerate() {
        let (bytes, _) = entry.live_bytes_on_fragment(WORDS_PER_ENTRY, fragment.carries_into(i));
        total += bytes as u64;
    }
    if total > u32::MAX as u64 {
        return Err(Error::InvariantViolation("live byte total exceeds entry prefix capacity"));
    }
    Ok(())
}
