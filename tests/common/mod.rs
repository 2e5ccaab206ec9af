// SPDX-FileCopyrightText: 2024 Sean Cross <sean@xobs.io>
// SPDX-License-Identifier: Apache-2.0

//! Shared fixtures for the end-to-end scenario tests.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use lazy_static::lazy_static;

use fragment_relocate::config::PageSizeClass;
use fragment_relocate::{Page, PageAllocator, RawOffset};

lazy_static! {
    static ref LOGGER_INIT: () = {
        let _ = env_logger::builder().is_test(true).try_init();
    };
}

pub fn init_logging() {
    lazy_static::initialize(&LOGGER_INIT);
}

#[derive(Clone)]
pub struct FakePage {
    pub start: RawOffset,
    pub size: usize,
    top: Arc<AtomicU64>,
}

impl FakePage {
    pub fn new(start: u64, size: usize) -> Self {
        FakePage { start: RawOffset::new(start), size, top: Arc::new(AtomicU64::new(start)) }
    }
}

impl Page for FakePage {
    fn start(&self) -> RawOffset { self.start }
    fn size(&self) -> usize { self.size }
    fn top(&self) -> RawOffset { RawOffset::new(self.top.load(Ordering::Relaxed)) }
    fn alloc_object(&self, bytes: usize) -> Option<RawOffset> {
        let offset = self.top.load(Ordering::Relaxed);
        if offset + bytes as u64 > self.start.get() + self.size as u64 {
            return None;
        }
        self.top.fetch_add(bytes as u64, Ordering::Relaxed);
        Some(RawOffset::new(offset))
    }
    fn object_alignment_shift(&self) -> u32 { 3 }
}

pub struct FakeAllocator {
    next_start: Cell<u64>,
    pub freed: RefCell<Vec<u64>>,
}

unsafe impl Sync for FakeAllocator {}

impl FakeAllocator {
    pub fn new(next_start: u64) -> Self { FakeAllocator { next_start: Cell::new(next_start), freed: RefCell::new(Vec::new()) } }
}

impl PageAllocator for FakeAllocator {
    type PageHandle = FakePage;
    fn alloc_page(&self, class: PageSizeClass) -> fragment_relocate::Result<FakePage> {
        let start = self.next_start.get();
        self.next_start.set(start + class.byte_size() as u64);
        Ok(FakePage::new(start, class.byte_size()))
    }
    fn free_page(&self, page: FakePage, _reclaimed: bool) {
        self.freed.borrow_mut().push(page.start.get());
    }
}

pub struct SizedObjects {
    pub sizes: Mutex<HashMap<u64, usize>>,
    pub copies: Mutex<Vec<(u64, u64, usize)>>,
}

impl SizedObjects {
    pub fn new() -> Self { SizedObjects { sizes: Mutex::new(HashMap::new()), copies: Mutex::new(Vec::new()) } }

    pub fn register(&self, at: u64, size: usize) { self.sizes.lock().unwrap().insert(at, size); }
}

impl fragment_relocate::ObjectLayout for SizedObjects {
    fn object_size(&self, addr: fragment_relocate::ColouredAddress) -> usize {
        *self.sizes.lock().unwrap().get(&addr.0).unwrap()
    }
    fn object_copy(&self, from: fragment_relocate::ColouredAddress, to: fragment_relocate::ColouredAddress, bytes: usize) {
        self.copies.lock().unwrap().push((from.0, to.0, bytes));
    }
}

pub struct VecLiveMap {
    pub live: Vec<bool>,
}

impl fragment_relocate::LiveMap for VecLiveMap {
    fn first_live_segment(&self) -> Option<usize> { Some(0) }
    fn next_live_segment(&self, _segment: usize) -> Option<usize> { None }
    fn segment_start(&self, _segment: usize) -> usize { 0 }
    fn segment_end(&self, _segment: usize) -> usize { self.live.len() }
    fn get_next_one_offset(&self, from: usize, to: usize) -> Option<usize> {
        (from..to).find(|&i| self.live[i])
    }
}
