// SPDX-FileCopyrightText: 2024 Sean Cross <sean@xobs.io>
// SPDX-License-Identifier: Apache-2.0

//! End-to-end scenarios exercising the full populate -> relocate ->
//! forward pipeline through the published API only.

mod common;

use std::sync::Arc;
use std::thread;

use common::{init_logging, FakeAllocator, FakePage, SizedObjects, VecLiveMap};

use fragment_relocate::color::IdentityColoring;
use fragment_relocate::config::{GcConfig, PageSizeClass, ENTRY_SPAN_BYTES};
use fragment_relocate::fragment_table::FragmentTable;
use fragment_relocate::relocator::{forward_object, relocate_object, RelocationSetIterator};
use fragment_relocate::{ColouredAddress, Fragment};

fn config() -> GcConfig {
    GcConfig::new(2 * 1024 * 1024, ENTRY_SPAN_BYTES, 1usize << 40)
}

/// S1: an empty page -- no live objects at all. Population must succeed
/// with every entry's prefix at zero and relocation must be a no-op.
#[test]
fn s1_empty_page_evacuates_cleanly() {
    init_logging();
    let old = FakePage::new(0x10_000_000, 2 * 1024 * 1024);
    let new = FakePage::new(0x20_000_000, 2 * 1024 * 1024);
    let mut fragment = Fragment::create(old, new, &config());

    let live_map = VecLiveMap { live: vec![false; 2 * 1024 * 1024] };
    let objects = SizedObjects::new();
    let allocator = FakeAllocator::new(0x30_000_000);

    fragment_relocate::populator::populate(
        &mut fragment,
        &allocator,
        PageSizeClass::Small,
        &live_map,
        &objects,
        &IdentityColoring,
    )
    .unwrap();

    assert!(fragment.page_break_offset().is_none());
    assert!(objects.copies.lock().unwrap().is_empty());
}

/// S2: a single small object at the very start of the page.
#[test]
fn s2_single_small_object() {
    init_logging();
    let old = FakePage::new(0x10_000_000, 2 * 1024 * 1024);
    let new = FakePage::new(0x20_000_000, 2 * 1024 * 1024);
    let mut fragment = Fragment::create(old, new.clone(), &config());

    let mut live = vec![false; 2 * 1024 * 1024];
    live[0] = true;
    let live_map = VecLiveMap { live };
    let objects = SizedObjects::new();
    objects.register(0x10_000_000, 16);
    let allocator = FakeAllocator::new(0x30_000_000);

    fragment_relocate::populator::populate(
        &mut fragment,
        &allocator,
        PageSizeClass::Small,
        &live_map,
        &objects,
        &IdentityColoring,
    )
    .unwrap();

    let to = relocate_object(
        &fragment,
        fragment_relocate::RawOffset::new(0x10_000_000),
        &objects,
        &IdentityColoring,
    );
    assert_eq!(to, new.start());
    assert_eq!(objects.copies.lock().unwrap().as_slice(), &[(0x10_000_000, new.start().get(), 16)]);
}

/// S3: two objects whose first words both fall in entry 0.
#[test]
fn s3_two_objects_share_one_entry() {
    init_logging();
    let old = FakePage::new(0x10_000_000, 2 * 1024 * 1024);
    let new = FakePage::new(0x20_000_000, 2 * 1024 * 1024);
    let mut fragment = Fragment::create(old, new.clone(), &config());

    let mut live = vec![false; 2 * 1024 * 1024];
    live[0] = true;
    live[24] = true;
    let live_map = VecLiveMap { live };
    let objects = SizedObjects::new();
    objects.register(0x10_000_000, 24);
    objects.register(0x10_000_018, 16);
    let allocator = FakeAllocator::new(0x30_000_000);

    fragment_relocate::populator::populate(
        &mut fragment,
        &allocator,
        PageSizeClass::Small,
        &live_map,
        &objects,
        &IdentityColoring,
    )
    .unwrap();

    let a = relocate_object(&fragment, fragment_relocate::RawOffset::new(0x10_000_000), &objects, &IdentityColoring);
    let b = relocate_object(&fragment, fragment_relocate::RawOffset::new(0x10_000_018), &objects, &IdentityColoring);
    assert_eq!(a, new.start());
    assert_eq!(b.get() - new.start().get(), 24);
    assert_eq!(objects.copies.lock().unwrap().len(), 2);
}

/// S4: the primary destination page runs out of room partway through
/// population, forcing a page break onto a freshly allocated secondary.
#[test]
fn s4_page_break_onto_secondary() {
    init_logging();
    let small = PageSizeClass::Small.byte_size();
    let old = FakePage::new(0x10_000_000, small);
    let new_primary = FakePage::new(0x20_000_000, 16); // room for exactly one 16-byte object
    let mut fragment = Fragment::create(old, new_primary.clone(), &config());

    let mut live = vec![false; small];
    live[0] = true;
    live[0x100] = true;
    let live_map = VecLiveMap { live };
    let objects = SizedObjects::new();
    objects.register(0x10_000_000, 16);
    objects.register(0x10_000_100, 32);
    let allocator = FakeAllocator::new(0x30_000_000);

    fragment_relocate::populator::populate(
        &mut fragment,
        &allocator,
        PageSizeClass::Small,
        &live_map,
        &objects,
        &IdentityColoring,
    )
    .unwrap();

    assert!(fragment.page_break_offset().is_some());
    let first = relocate_object(&fragment, fragment_relocate::RawOffset::new(0x10_000_000), &objects, &IdentityColoring);
    assert_eq!(first, new_primary.start());
    let second = relocate_object(&fragment, fragment_relocate::RawOffset::new(0x10_000_100), &objects, &IdentityColoring);
    let secondary = fragment.destination_page(fragment_relocate::RawOffset::new(0x10_000_100));
    assert_eq!(second, secondary.start());
}

/// S5: a worker thread and the "mutator" race to relocate the very same
/// object via `relocate_object` and `forward_object` respectively. Both
/// must observe the object copied exactly once and agree on its new
/// location.
#[test]
fn s5_concurrent_worker_and_mutator_agree() {
    init_logging();
    let old = FakePage::new(0x10_000_000, 2 * 1024 * 1024);
    let new = FakePage::new(0x20_000_000, 2 * 1024 * 1024);
    let mut fragment = Fragment::create(old, new.clone(), &config());

    let mut live = vec![false; 2 * 1024 * 1024];
    live[0] = true;
    let live_map = VecLiveMap { live };
    let objects = Arc::new(SizedObjects::new());
    objects.register(0x10_000_000, 16);
    let allocator = FakeAllocator::new(0x30_000_000);

    fragment_relocate::populator::populate(
        &mut fragment,
        &allocator,
        PageSizeClass::Small,
        &live_map,
        &objects,
        &IdentityColoring,
    )
    .unwrap();

    let fragment = Arc::new(fragment);
    let table = Arc::new(FragmentTable::<FakePage>::new(&config()));
    table.insert(&fragment);

    let from = fragment_relocate::RawOffset::new(0x10_000_000);

    let worker = {
        let fragment = Arc::clone(&fragment);
        let objects = Arc::clone(&objects);
        thread::spawn(move || relocate_object(&fragment, from, &*objects, &IdentityColoring))
    };
    let mutator_result = forward_object(&table, &*objects, &IdentityColoring, ColouredAddress::new(from.get()));
    let worker_result = worker.join().unwrap();

    assert_eq!(mutator_result.0, worker_result.get());
    assert_eq!(objects.copies.lock().unwrap().len(), 1);
}

/// S6: a 512-byte object whose words span exactly two fixed-width
/// entries (entry 7 and entry 8), with no object starting or ending
/// anywhere else nearby.
#[test]
fn s6_object_spans_two_entries() {
    init_logging();
    let old = FakePage::new(0x10_000_000, 2 * 1024 * 1024);
    let new = FakePage::new(0x20_000_000, 2 * 1024 * 1024);
    let mut fragment = Fragment::create(old, new.clone(), &config());

    let mut live = vec![false; 2 * 1024 * 1024];
    let start_rel = 7 * ENTRY_SPAN_BYTES; // entry 7, internal word 0
    live[start_rel] = true;
    let live_map = VecLiveMap { live };
    let objects = SizedObjects::new();
    objects.register(0x10_000_000 + start_rel as u64, 512);
    let allocator = FakeAllocator::new(0x30_000_000);

    fragment_relocate::populator::populate(
        &mut fragment,
        &allocator,
        PageSizeClass::Small,
        &live_map,
        &objects,
        &IdentityColoring,
    )
    .unwrap();

    let from = fragment_relocate::RawOffset::new(0x10_000_000 + start_rel as u64);
    assert_eq!(fragment.offset_to_index(from), 7);
    let to = relocate_object(&fragment, from, &objects, &IdentityColoring);
    assert_eq!(to, new.start());
    assert_eq!(objects.copies.lock().unwrap().as_slice(), &[(from.get(), new.start().get(), 512)]);
}
