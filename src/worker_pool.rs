// SPDX-FileCopyrightText: 2024 Sean Cross <sean@xobs.io>
// SPDX-License-Identifier: Apache-2.0

//! A minimal scoped worker pool draining a [`RelocationSetIterator`] with
//! a fixed number of threads, each racing the others for whichever
//! Fragment comes up next.
//!
//! Grounded in the kernel's own hosted test harness
//! (`kernel/src/test.rs`), which spawns named `std::thread`s and uses
//! `crossbeam_channel` to hand results back to a coordinator rather than
//! joining on a `Vec<JoinHandle<_>>` directly.

use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Receiver};

use crate::color::AddressColoring;
use crate::error::Error;
use crate::fragment::Fragment;
use crate::object_layout::ObjectLayout;
use crate::page::{Page, PageAllocator};
use crate::relocator::{relocate_entry, RelocationSetIterator};

/// Relocates an entire relocation set using `worker_count` threads, each
/// draining `work` until it is empty, releasing every Fragment it
/// finishes back to `allocator`. Blocks until every Fragment has been
/// fully relocated and released.
///
/// `object_layout`/`coloring` must be `Send + Sync` -- they are shared,
/// read-only, across every worker thread for the duration of the call.
pub fn relocate_set<P, A, O, C>(
    work: Arc<RelocationSetIterator<P>>,
    allocator: Arc<A>,
    object_layout: Arc<O>,
    coloring: Arc<C>,
    worker_count: usize,
) where
    P: Page + Clone + 'static,
    A: PageAllocator<PageHandle = P> + Send + Sync + 'static,
    O: ObjectLayout + Send + Sync + 'static,
    C: AddressColoring + Send + Sync + 'static,
{
    let worker_count = worker_count.max(1);
    log::debug!("relocate_set: draining {} fragments across {} workers", work.len(), worker_count);

    thread::scope(|scope| {
        for id in 0..worker_count {
            let work = Arc::clone(&work);
            let allocator = Arc::clone(&allocator);
            let object_layout = Arc::clone(&object_layout);
            let coloring = Arc::clone(&coloring);
            let builder = thread::Builder::new().name(format!("fragment-relocate-worker-{}", id));
            builder
                .spawn_scoped(scope, move || {
                    relocate_worker_loop(&work, &*allocator, &*object_layout, &*coloring);
                })
                .expect("failed to spawn relocation worker thread");
        }
    });

    log::debug!("relocate_set: all workers drained");
}

fn relocate_worker_loop<P, A, O, C>(work: &RelocationSetIterator<P>, allocator: &A, object_layout: &O, coloring: &C)
where
    P: Page + Clone,
    A: PageAllocator<PageHandle = P>,
    O: ObjectLayout,
    C: AddressColoring,
{
    while let Some(fragment) = work.next_fragment() {
        relocate_fragment_fully(&fragment, object_layout, coloring);
        fragment.release(allocator);
    }
}

fn relocate_fragment_fully<P, O, C>(fragment: &Fragment<P>, object_layout: &O, coloring: &C)
where
    P: Page + Clone,
    O: ObjectLayout,
    C: AddressColoring,
{
    for entry_index in 0..fragment.entries().len() {
        relocate_entry(fragment, entry_index, object_layout, coloring);
    }
}

/// Spawns `relocate_set` on a background thread and returns a receiver
/// that yields once when it completes, letting a caller overlap other
/// coordinator-side bookkeeping with relocation. Mirrors the
/// readiness-channel idiom in `kernel/src/test.rs`.
pub fn relocate_set_async<P, A, O, C>(
    work: Arc<RelocationSetIterator<P>>,
    allocator: Arc<A>,
    object_layout: Arc<O>,
    coloring: Arc<C>,
    worker_count: usize,
) -> Receiver<Result<(), Error>>
where
    P: Page + Clone + Send + Sync + 'static,
    A: PageAllocator<PageHandle = P> + Send + Sync + 'static,
    O: ObjectLayout + Send + Sync + 'static,
    C: AddressColoring + Send + Sync + 'static,
{
    let (tx, rx) = bounded(1);
    thread::Builder::new()
        .name("fragment-relocate-coordinator".into())
        .spawn(move || {
            relocate_set(work, allocator, object_layout, coloring, worker_count);
            let _ = tx.send(Ok(()));
        })
        .expect("failed to spawn relocation coordinator thread");
    rx
}
