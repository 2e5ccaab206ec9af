// SPDX-FileCopyrightText: 2024 Sean Cross <sean@xobs.io>
// SPDX-License-Identifier: Apache-2.0

//! Concurrent compaction/relocation core for a region-based garbage
//! collector.
//!
//! This crate implements the "Fragment" subsystem: per-source-page
//! bookkeeping (live-object delimiters, destination-offset arithmetic,
//! refcounted page lifetime) and the relocation path built on top of it,
//! modeled on the concurrent-relocation design in OpenJDK's ZGC. It does
//! not implement a garbage collector end to end -- marking,
//! relocation-set selection, root scanning, and the address-coloring load
//! barrier are all supplied by the embedder through the trait boundaries
//! in [`page`], [`live_map`], [`object_layout`], and [`color`].
//!
//! The moving parts, in the order an embedder drives them:
//!
//! 1. After marking, call [`populator::populate`] once per selected
//!    source page to build its [`fragment::Fragment`].
//! 2. Publish the populated Fragment into a shared
//!    [`fragment_table::FragmentTable`].
//! 3. Hand the set of Fragments to [`relocator::RelocationSetIterator`]
//!    and drain it with [`worker_pool::relocate_set`] (or
//!    [`worker_pool::relocate_set_async`]).
//! 4. Route the load barrier's slow path through
//!    [`relocator::forward_object`] for the remainder of the cycle.

pub mod color;
pub mod config;
pub mod error;
pub mod fragment;
pub mod fragment_entry;
pub mod fragment_table;
pub mod live_map;
pub mod object_layout;
pub mod page;
pub mod populator;
pub mod relocator;
pub mod worker_pool;

pub use color::{AddressColoring, ColouredAddress, RawOffset};
pub use config::GcConfig;
pub use error::{Error, Result};
pub use fragment::Fragment;
pub use fragment_table::FragmentTable;
pub use live_map::LiveMap;
pub use object_layout::ObjectLayout;
pub use page::{Page, PageAllocator};
pub use relocator::{forward_object, relocate_object, RelocationSetIterator};
