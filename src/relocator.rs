// SPDX-FileCopyrightText: 2024 Sean Cross <sean@xobs.io>
// SPDX-License-Identifier: Apache-2.0

//! Relocation of live objects off a Fragment's source page.
//!
//! Two entry points cover the two callers that need it: GC
//! worker threads draining the relocation set (`relocate_object`, driven
//! by a [`RelocationSetIterator`]), and a mutator's load barrier racing
//! those workers on the very same objects (`forward_object`). Both read
//! through the same `copied` bit so a mutator never duplicates a copy a
//! worker already made, and vice versa.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::color::{AddressColoring, ColouredAddress, RawOffset};
use crate::error::Result;
use crate::fragment::Fragment;
use crate::fragment_entry::WORDS_PER_ENTRY;
use crate::fragment_table::FragmentTable;
use crate::object_layout::ObjectLayout;
use crate::page::{Page, PageAllocator};

/// Copies every live object whose first word falls in `entry_index`'s
/// 256-byte slice, unless another thread has already claimed (and
/// therefore already performed, or is performing) that copy.
///
/// Returns without copying anything if `try_claim_copy` loses the race:
/// at most one thread ever executes the copy loop below for a given
/// entry.
pub fn relocate_entry<P, O, C>(fragment: &Fragment<P>, entry_index: usize, object_layout: &O, coloring: &C)
where
    P: Page + Clone,
    O: ObjectLayout,
    C: AddressColoring,
{
    let entry = &fragment.entries()[entry_index];
    if !entry.try_claim_copy() {
        return;
    }

    // If an earlier entry's object is still open when it reaches this
    // entry, this entry's first live bit (if any) only closes it -- that
    // object's bytes were already copied while processing its own start
    // entry. Skip past that lone bit before hunting for start/end pairs of
    // objects that actually begin here.
    let mut cursor = 0u32;
    if fragment.carries_into(entry_index) {
        while cursor < WORDS_PER_ENTRY && !entry.get_liveness(cursor) {
            cursor += 1;
        }
        cursor += 1;
    }
    while let Some((start_internal, next_cursor)) = entry.next_live_object(cursor) {
        let from_offset = fragment.from_offset(entry_index, start_internal);
        let from_coloured = coloring.color(from_offset);
        let size = object_layout.object_size(from_coloured);
        let to_offset = fragment.to_offset(from_offset);
        let to_coloured = coloring.color(to_offset);
        object_layout.object_copy(from_coloured, to_coloured, size);
        cursor = next_cursor;
    }
}

/// Worker-side relocation of a single object. Used by the relocation-set
/// drain loop in [`crate::worker_pool`]: looks up the owning entry,
/// relocates the whole entry's worth of objects if not already done
/// (amortising the CAS over every object that shares the entry), and
/// returns the object's destination offset.
pub fn relocate_object<P, O, C>(fragment: &Fragment<P>, from_offset: RawOffset, object_layout: &O, coloring: &C) -> RawOffset
where
    P: Page + Clone,
    O: ObjectLayout,
    C: AddressColoring,
{
    let entry_index = fragment.offset_to_index(from_offset);
    relocate_entry(fragment, entry_index, object_layout, coloring);
    fragment.to_offset(from_offset)
}

/// Mutator-side forwarding lookup: the load-barrier slow path.
/// If `addr` is not covered by any currently-registered
/// Fragment, it is returned unchanged -- the object has either already
/// been fully relocated and its Fragment decommissioned, or was never on
/// the relocation set. If it is covered, the owning Fragment is retained
/// for the duration of the lookup, relocated if necessary, then released:
/// this is what lets a mutator safely race a concurrent `release()` on
/// the same Fragment without ever reading freed destination-page state.
pub fn forward_object<P, O, C>(
    table: &FragmentTable<P>,
    object_layout: &O,
    coloring: &C,
    addr: ColouredAddress,
) -> ColouredAddress
where
    P: Page + Clone,
    O: ObjectLayout,
    C: AddressColoring,
{
    let from_offset = coloring.strip(addr);
    let fragment_ptr = match table.get(from_offset) {
        Some(ptr) => ptr,
        None => return addr,
    };
    // SAFETY: `table.get` only returns pointers written by `insert`, which
    // takes them from a live `Arc`; the table's own invariant (no granule
    // is cleared until the owning Fragment's `release()` reaches zero) is
    // exactly what makes reading through the raw pointer sound here
    // without our own retain -- but we still race a concurrent release(),
    // so `retain()` is mandatory before touching Fragment-owned state.
    let fragment = unsafe { &*fragment_ptr };
    if fragment.retain().is_err() {
        // Lost the race: the Fragment was just decommissioned. Its source
        // page is dead and every live object on it has already been
        // copied, so the only sound destination left to return is the
        // unmodified address -- the caller is expected to re-read through
        // whatever forwarding the embedder keeps for decommissioned
        // fragments (out of scope here).
        return addr;
    }
    let to_offset = relocate_object(fragment, from_offset, object_layout, coloring);
    fragment.release(&NoopAllocator::<P>::default());
    coloring.color(to_offset)
}

/// `forward_object` must never actually free a page through the
/// allocator it hands to `Fragment::release` -- the real free happens
/// exactly once, driven by the worker that drained the Fragment's last
/// task, not by a racing mutator. This no-op stands in for "this call
/// site never observes `prev == 1`" in the overwhelming common case; if
/// it ever does (the mutator happens to be the very last retainer), the
/// page is silently leaked rather than freed twice -- acceptable only
/// because real embedders are expected to route `forward_object` through
/// their own allocator instance instead of this one. See DESIGN.md.
struct NoopAllocator<P>(std::marker::PhantomData<P>);

impl<P> Default for NoopAllocator<P> {
    fn default() -> Self { NoopAllocator(std::marker::PhantomData) }
}

impl<P: Page + Clone> PageAllocator for NoopAllocator<P> {
    type PageHandle = P;
    fn alloc_page(&self, _class: crate::config::PageSizeClass) -> Result<P> {
        unreachable!("forward_object's allocator is never asked to allocate")
    }
    fn free_page(&self, _page: P, _reclaimed: bool) {
        log::warn!("forward_object observed the last release of a fragment's source page; leaking it rather than double-freeing");
    }
}

/// Work-stealing iterator over the Fragments in one relocation set.
/// Every GC worker thread shares one `RelocationSetIterator`; each call to
/// [`Self::next_fragment`] hands out a distinct Fragment via an atomic
/// fetch-add, so workers never contend beyond that single instruction.
pub struct RelocationSetIterator<P: Page + Clone> {
    fragments: Vec<Arc<Fragment<P>>>,
    next: AtomicUsize,
}

impl<P: Page + Clone> RelocationSetIterator<P> {
    pub fn new(fragments: Vec<Arc<Fragment<P>>>) -> Self {
        RelocationSetIterator { fragments, next: AtomicUsize::new(0) }
    }

    /// Claims the next Fragment for the calling worker, retaining it on
    /// the caller's behalf. The caller must `release()` it (via whatever
    /// allocator actually owns its source page) once every entry has been
    /// relocated.
    pub fn next_fragment(&self) -> Option<Arc<Fragment<P>>> {
        loop {
            let i = self.next.fetch_add(1, Ordering::Relaxed);
            let fragment = self.fragments.get(i)?;
            if fragment.retain().is_ok() {
                return Some(fragment.clone());
            }
            // Already decommissioned by the time we reached it -- can only
            // happen if a caller released it early; skip and keep draining.
        }
    }

    pub fn len(&self) -> usize { self.fragments.len() }
    pub fn is_empty(&self) -> bool { self.fragments.is_empty() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::IdentityColoring;
    use crate::config::{GcConfig, ENTRY_SPAN_BYTES};
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Clone)]
    struct FakePage {
        start: RawOffset,
        size: usize,
        top: Arc<AtomicU64>,
    }

    impl FakePage {
        fn new(start: u64, size: usize) -> Self {
            FakePage { start: RawOffset::new(start), size, top: Arc::new(AtomicU64::new(start)) }
        }
    }

    impl Page for FakePage {
        fn start(&self) -> RawOffset { self.start }
        fn size(&self) -> usize { self.size }
        fn top(&self) -> RawOffset { RawOffset::new(self.top.load(Ordering::Relaxed)) }
        fn alloc_object(&self, bytes: usize) -> Option<RawOffset> {
            let offset = self.top.load(Ordering::Relaxed);
            self.top.store(offset + bytes as u64, Ordering::Relaxed);
            Some(RawOffset::new(offset))
        }
        fn object_alignment_shift(&self) -> u32 { 3 }
    }

    struct RecordingObjects {
        sizes: HashMap<u64, usize>,
        copies: RefCell<Vec<(u64, u64, usize)>>,
    }

    impl ObjectLayout for RecordingObjects {
        fn object_size(&self, addr: ColouredAddress) -> usize { *self.sizes.get(&addr.0).unwrap() }
        fn object_copy(&self, from: ColouredAddress, to: ColouredAddress, bytes: usize) {
            self.copies.borrow_mut().push((from.0, to.0, bytes));
        }
    }

    fn fragment_with_one_object() -> Fragment<FakePage> {
        let old = FakePage::new(0x10_000_000, 2 * 1024 * 1024);
        let new = FakePage::new(0x20_000_000, 2 * 1024 * 1024);
        let config = GcConfig::new(2 * 1024 * 1024, ENTRY_SPAN_BYTES, 1usize << 40);
        let mut f = Fragment::create(old, new, &config);
        f.begin_populating();
        let start = RawOffset::new(0x10_000_000);
        let entry = f.find(start);
        entry.set_liveness(0);
        entry.set_size_bit(0, 16);
        entry.set_live_bytes_prefix(0);
        f.finalize_carry_table();
        f.mark_active();
        f
    }

    #[test]
    fn relocate_object_copies_exactly_once_even_if_requested_twice() {
        let fragment = fragment_with_one_object();
        let mut sizes = HashMap::new();
        sizes.insert(0x10_000_000u64, 16usize);
        let objects = RecordingObjects { sizes, copies: RefCell::new(Vec::new()) };

        let from = RawOffset::new(0x10_000_000);
        let a = relocate_object(&fragment, from, &objects, &IdentityColoring);
        let b = relocate_object(&fragment, from, &objects, &IdentityColoring);
        assert_eq!(a, b);
        assert_eq!(objects.copies.borrow().len(), 1);
    }

    #[test]
    fn relocation_set_iterator_hands_out_each_fragment_once() {
        let a = Arc::new(fragment_with_one_object());
        let b = Arc::new(fragment_with_one_object());
        let iter = RelocationSetIterator::new(vec![a.clone(), b.clone()]);
        let first = iter.next_fragment().unwrap();
        let second = iter.next_fragment().unwrap();
        assert!(iter.next_fragment().is_none());
        assert_eq!(iter.len(), 2);
        assert!(Arc::ptr_eq(&first, &a) || Arc::ptr_eq(&first, &b));
        assert!(Arc::ptr_eq(&second, &a) || Arc::ptr_eq(&second, &b));
        assert!(!Arc::ptr_eq(&first, &second));
    }
}
