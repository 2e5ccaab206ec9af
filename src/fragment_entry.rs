// SPDX-FileCopyrightText: 2024 Sean Cross <sean@xobs.io>
// SPDX-License-Identifier: Apache-2.0

//! `FragmentEntry`: a packed 64-bit summary of one 256-byte source slice.
//!
//! Layout (bit 63 is the high bit):
//!
//! ```text
//!  63            62                                32 31                              0
//! +--+-------------------------------------------+--------------------------------------+
//! |C |           live-bytes-prefix (31)           |            live-bits (32)            |
//! +--+-------------------------------------------+--------------------------------------+
//! ```
//!
//! `live-bits` records object starts and ends within the slice: a pair of
//! set bits delimits one live object, chosen so that a liveness test is a
//! single shift-and-mask and the prefix arithmetic is branch-free. Ported
//! from the bit-field layout in `zFragmentEntry.hpp`/`zFragmentEntry.inline.hpp`.

use core::sync::atomic::{AtomicU64, Ordering};

const LIVE_BITS_SHIFT: u32 = 0;
const LIVE_BITS_MASK: u64 = 0xFFFF_FFFF;
const LIVE_BYTES_PREFIX_SHIFT: u32 = 32;
const LIVE_BYTES_PREFIX_BITS: u32 = 31;
const LIVE_BYTES_PREFIX_MASK: u64 = (1u64 << LIVE_BYTES_PREFIX_BITS) - 1;
const COPIED_SHIFT: u32 = 63;
const COPIED_BIT: u64 = 1u64 << COPIED_SHIFT;

/// Maximum live-bytes-prefix value representable in the 31-bit field.
pub const MAX_LIVE_BYTES_PREFIX: u32 = (1u32 << LIVE_BYTES_PREFIX_BITS) - 1;

/// Number of 8-byte words summarised by one entry.
pub const WORDS_PER_ENTRY: u32 = 32;

/// Cursor used by [`FragmentEntry::next_live_object`] to resume a scan.
/// Opaque; callers thread it through successive calls.
pub type ObjectCursor = u32;

#[derive(Debug)]
pub struct FragmentEntry(AtomicU64);

impl Default for FragmentEntry {
    fn default() -> Self { FragmentEntry::new() }
}

impl FragmentEntry {
    pub const fn new() -> Self { FragmentEntry(AtomicU64::new(0)) }

    /// Bit `i` of the live-bits field. Precondition: `i < 32`.
    pub fn get_liveness(&self, i: u32) -> bool {
        debug_assert!(i < WORDS_PER_ENTRY, "liveness index out of bounds");
        let word = self.0.load(Ordering::Relaxed);
        (word >> (LIVE_BITS_SHIFT + i)) & 1 == 1
    }

    /// Sets bit `i` of the live-bits field. Only legal during population,
    /// before the entry is published; fails (debug-asserts) if `copied`
    /// has already been set.
    pub fn set_liveness(&self, i: u32) {
        debug_assert!(i < WORDS_PER_ENTRY, "liveness index out of bounds");
        debug_assert!(!self.copied(), "updating liveness on a copied entry");
        self.0.fetch_or(1u64 << (LIVE_BITS_SHIFT + i), Ordering::Relaxed);
    }

    /// Given an object whose first word is at internal index `start_i`
    /// and whose size in bytes is `size`, additionally marks its last
    /// word -- but only if that word falls within this same entry. If the
    /// object spills past word 31, no bit is set here; the closing bit is
    /// recorded by whichever later entry contains the object's last word.
    pub fn set_size_bit(&self, start_i: u32, size: usize) {
        debug_assert!(size >= 8 && size % 8 == 0, "object size must be a non-zero multiple of 8");
        let words = (size / 8) as u32;
        // end_i is deliberately NOT masked to the entry's 32-word span:
        // an unmasked value >= 32 signals a cross-entry object, whose
        // closing bit belongs to a later entry instead.
        let end_i = start_i + words - 1;
        if end_i < WORDS_PER_ENTRY {
            self.set_liveness(end_i);
        }
    }

    /// The live-bytes-prefix field: the count of live bytes on the
    /// destination page strictly before this entry's slice.
    pub fn live_bytes_prefix(&self) -> u32 {
        let word = self.0.load(Ordering::Relaxed);
        ((word >> LIVE_BYTES_PREFIX_SHIFT) & LIVE_BYTES_PREFIX_MASK) as u32
    }

    pub fn set_live_bytes_prefix(&self, value: u32) {
        debug_assert!(value <= MAX_LIVE_BYTES_PREFIX, "live-bytes-prefix overflow");
        debug_assert!(!self.copied(), "updating live-bytes-prefix on a copied entry");
        let mut word = self.0.load(Ordering::Relaxed);
        loop {
            let new_word = (word & !(LIVE_BYTES_PREFIX_MASK << LIVE_BYTES_PREFIX_SHIFT))
                | ((value as u64) << LIVE_BYTES_PREFIX_SHIFT);
            match self.0.compare_exchange_weak(word, new_word, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => return,
                Err(observed) => word = observed,
            }
        }
    }

    /// Whether every live object whose first word lies in this slice has
    /// been relocated. Acquire-ordered: a `true` result happens-before the
    /// copied bytes at the object's destination.
    pub fn copied(&self) -> bool { self.0.load(Ordering::Acquire) & COPIED_BIT != 0 }

    /// Sets the copied flag with release ordering. Idempotent: setting it
    /// twice is a no-op, never an error, so a retrying caller never needs
    /// to special-case "already set".
    pub fn set_copied(&self) { self.0.fetch_or(COPIED_BIT, Ordering::Release); }

    /// Attempts to be the thread that transitions this entry from
    /// not-copied to copied. Returns `true` exactly once across however
    /// many callers race on the same entry; this is the lock-free,
    /// scales-with-worker-count stand-in for a per-entry mutex.
    pub fn try_claim_copy(&self) -> bool {
        let mut word = self.0.load(Ordering::Acquire);
        loop {
            if word & COPIED_BIT != 0 {
                return false;
            }
            match self.0.compare_exchange_weak(
                word,
                word | COPIED_BIT,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => word = observed,
            }
        }
    }

    /// Byte count (a multiple of 8) of live objects whose first word lies
    /// strictly before `from_internal` within this entry's 256-byte slice.
    /// `counting` carries whether a cross-entry object (started in an
    /// earlier entry, not yet closed) is "in progress" as of the start of
    /// this entry; it is threaded in by the Fragment-level walk across
    /// entry boundaries and returned updated for the next entry.
    pub fn live_bytes_on_fragment(&self, from_internal: u32, mut counting: bool) -> (u32, bool) {
        debug_assert!(from_internal <= WORDS_PER_ENTRY);
        let mut bytes = 0u32;
        let mut i = 0u32;
        let mut start: Option<u32> = if counting { Some(0) } else { None };
        while i < from_internal {
            if self.get_liveness(i) {
                match start {
                    None => start = Some(i),
                    Some(s) => {
                        bytes += (i - s + 1) * 8;
                        start = None;
                        counting = false;
                    }
                }
            }
            i += 1;
        }
        if start.is_some() {
            // the object starting at `start` (or carried in from a prior
            // entry) has not closed by `from_internal`; it is still live
            // up to (but not including) `from_internal`.
            bytes += (from_internal - start.unwrap()) * 8;
            counting = true;
        }
        (bytes, counting)
    }

    /// Iterates object *starts* at or after `cursor`, ascending. Returns
    /// `(start_index, cursor_for_next_call)`, or `None` once the entry is
    /// exhausted. The cursor must be advanced past an object's *end* bit
    /// to find the next start; a 1-word object's start and end bit
    /// coincide and is handled without requiring two distinct set bits.
    pub fn next_live_object(&self, cursor: ObjectCursor) -> Option<(u32, ObjectCursor)> {
        let mut i = cursor;
        while i < WORDS_PER_ENTRY {
            if self.get_liveness(i) {
                let start = i;
                // find the matching end bit, which may be this same bit
                // (1-word object) or a later one.
                let mut j = i + 1;
                while j < WORDS_PER_ENTRY && !self.get_liveness(j) {
                    j += 1;
                }
                let next_cursor = if j < WORDS_PER_ENTRY { j + 1 } else { WORDS_PER_ENTRY };
                return Some((start, next_cursor));
            }
            i += 1;
        }
        None
    }
}
