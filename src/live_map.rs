// SPDX-FileCopyrightText: 2024 Sean Cross <sean@xobs.io>
// SPDX-License-Identifier: Apache-2.0

//! Marking-phase liveness bitmap, supplied by the (out-of-scope) marking
//! phase for one source page.
//!
//! The marking phase itself is not part of this subsystem. What the
//! Fragment subsystem needs from it is the ability to iterate, in
//! ascending order, the byte offset of every live object's first word
//! within a source page. The trait below (`first_live_segment`,
//! `next_live_segment`, `segment_start`/`segment_end`,
//! `get_next_one_offset`) matches the shape of a segmented bitmap, so a
//! real implementation can be dropped in without touching the populator.
//! To avoid dynamic dispatch on the hot path, `LiveMap::live_offsets` is a
//! generic
//! method, not a boxed trait object.

use crate::color::RawOffset;

/// A segment index within a [`LiveMap`]'s internal representation. Opaque
/// to the populator; only meaningful to a given `LiveMap` implementation.
pub type Segment = usize;

pub trait LiveMap {
    /// The first segment that may contain live bits, or `None` if the map
    /// is entirely empty.
    fn first_live_segment(&self) -> Option<Segment>;

    /// The next segment after `segment` that may contain live bits.
    fn next_live_segment(&self, segment: Segment) -> Option<Segment>;

    /// Byte offset (relative to the page start) at which `segment` begins.
    fn segment_start(&self, segment: Segment) -> usize;

    /// Byte offset (relative to the page start) at which `segment` ends
    /// (exclusive).
    fn segment_end(&self, segment: Segment) -> usize;

    /// Returns the offset (relative to the page start) of the next live
    /// object start in the half-open range `[from, to)`, or `None` if
    /// there isn't one.
    fn get_next_one_offset(&self, from: usize, to: usize) -> Option<usize>;

    /// Iterate every live object's start offset, relative to the page
    /// start, in ascending order. The default implementation walks
    /// segments via `next_live_segment` and bits via `get_next_one_offset`
    /// so a sparse bitmap never has to materialise a dense scan.
    fn live_offsets(&self) -> LiveOffsetIter<'_, Self>
    where
        Self: Sized,
    {
        LiveOffsetIter { map: self, segment: self.first_live_segment(), cursor: 0 }
    }
}

pub struct LiveOffsetIter<'a, M: LiveMap> {
    map: &'a M,
    segment: Option<Segment>,
    cursor: usize,
}

impl<'a, M: LiveMap> Iterator for LiveOffsetIter<'a, M> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        loop {
            let segment = self.segment?;
            let end = self.map.segment_end(segment);
            let from = self.cursor.max(self.map.segment_start(segment));
            if let Some(offset) = self.map.get_next_one_offset(from, end) {
                self.cursor = offset + 1;
                return Some(offset);
            }
            self.segment = self.map.next_live_segment(segment);
            self.cursor = self.segment.map(|s| self.map.segment_start(s)).unwrap_or(end);
        }
    }
}

/// Absolute variant of [`LiveMap::live_offsets`]: adds the page's own start
/// so the populator can work directly in [`RawOffset`] space.
pub fn live_offsets_absolute<M: LiveMap>(map: &M, page_start: RawOffset) -> impl Iterator<Item = RawOffset> + '_ {
    map.live_offsets().map(move |rel| page_start.add(rel as u64))
}
