// SPDX-FileCopyrightText: 2024 Sean Cross <sean@xobs.io>
// SPDX-License-Identifier: Apache-2.0

//! `FragmentTable`: address-indexed mapping from a raw offset to its
//! owning [`Fragment`].
//!
//! A flat array, one slot per granule of the address-offset space. A
//! Fragment covering a multi-granule page writes its pointer into every
//! granule slot it occupies; lookup is a single indexed load. Exactly one
//! `FragmentTable` exists per collector instance; its lifetime equals the
//! collector's.

use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

use crate::color::RawOffset;
use crate::config::GcConfig;
use crate::fragment::Fragment;
use crate::page::Page;

pub struct FragmentTable<P: Page + Clone> {
    granule_shift: u32,
    slots: Box<[AtomicPtr<Fragment<P>>]>,
}

impl<P: Page + Clone> FragmentTable<P> {
    pub fn new(config: &GcConfig) -> Self {
        let slot_count = config.offset_max >> config.granule_shift();
        let slots = (0..slot_count).map(|_| AtomicPtr::new(std::ptr::null_mut())).collect::<Vec<_>>().into_boxed_slice();
        FragmentTable { granule_shift: config.granule_shift(), slots }
    }

    fn granule_of(&self, offset: RawOffset) -> usize { (offset.get() >> self.granule_shift) as usize }

    /// Registers `fragment`'s address range. Every granule slot it
    /// occupies must currently be null -- two Fragments may never claim
    /// the same granule concurrently. Does not retain `fragment`: `create`
    /// already set the initial refcount to 1 and `insert` does not bump it.
    pub fn insert(&self, fragment: &Arc<Fragment<P>>) {
        let first = self.granule_of(fragment.old_start());
        let granules = fragment.old_size() >> self.granule_shift;
        let ptr = Arc::as_ptr(fragment) as *mut Fragment<P>;
        for g in first..first + granules.max(1) {
            let prev = self.slots[g].swap(ptr, Ordering::Release);
            debug_assert!(prev.is_null(), "granule {} already claimed by another fragment", g);
        }
        log::debug!(
            "fragment old_start={:#x}: published into table ({} granule(s) from {})",
            fragment.old_start().get(),
            granules.max(1),
            first
        );
    }

    /// Clears `fragment`'s granule slots. Every slot must currently point
    /// at exactly this Fragment.
    pub fn remove(&self, fragment: &Arc<Fragment<P>>) {
        let first = self.granule_of(fragment.old_start());
        let granules = fragment.old_size() >> self.granule_shift;
        let ptr = Arc::as_ptr(fragment) as *mut Fragment<P>;
        for g in first..first + granules.max(1) {
            let prev = self.slots[g].swap(std::ptr::null_mut(), Ordering::AcqRel);
            debug_assert_eq!(prev, ptr, "granule {} did not point at the fragment being removed", g);
        }
    }

    /// Looks up the Fragment owning `addr`, if any is currently under
    /// relocation. A single indexed, lock-free load.
    ///
    /// # Safety contract
    /// The returned reference is valid only as long as the Fragment
    /// remains registered (i.e. until the matching [`Self::remove`]
    /// call) -- [`crate::relocator::forward_object`] retains the Fragment
    /// through its own `Arc`-independent refcount before touching it, so
    /// callers of this crate's published API never observe the raw
    /// pointer directly.
    pub fn get(&self, addr: RawOffset) -> Option<*const Fragment<P>> {
        let g = self.granule_of(addr);
        let ptr = self.slots.get(g)?.load(Ordering::Acquire);
        if ptr.is_null() { None } else { Some(ptr as *const Fragment<P>) }
    }
}

// SAFETY: slots are plain atomic pointers; the Fragments they reference
// are themselves Send + Sync, and the table performs no interior mutation
// beyond those atomics.
unsafe impl<P: Page + Clone> Send for FragmentTable<P> {}
unsafe impl<P: Page + Clone> Sync for FragmentTable<P> {}
