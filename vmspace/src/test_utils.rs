// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Test doubles for the frame-allocator and page-table seams.

extern crate std;

use std::boxed::Box;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;
use std::sync::Mutex;
use std::vec::Vec;

use crate::address::{PhysicalAddress, VirtualAddress};
use crate::arch::ArchAddressSpace;
use crate::error::Error;
use crate::frame_alloc::{AllocError, FrameAllocator};
use crate::{Permissions, PAGE_SIZE};

/// A software page table: records installed translations and invalidations
/// so tests can cross-check them against the logical region tree.
///
/// Misuse (double installs, removing translations that don't exist) panics
/// immediately, which is exactly the corruption class the real hardware
/// adapter would let slip through silently.
#[derive(Debug, Default)]
pub struct EmulatedAddressSpace {
    translations: BTreeMap<VirtualAddress, (PhysicalAddress, Permissions)>,
    invalidations: Vec<Range<VirtualAddress>>,
}

impl EmulatedAddressSpace {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn translation(&self, virt: VirtualAddress) -> Option<(PhysicalAddress, Permissions)> {
        self.translations.get(&virt).copied()
    }

    #[must_use]
    pub fn translation_count(&self) -> usize {
        self.translations.len()
    }

    #[must_use]
    pub fn invalidations(&self) -> &[Range<VirtualAddress>] {
        &self.invalidations
    }
}

impl ArchAddressSpace for EmulatedAddressSpace {
    fn map_page(
        &mut self,
        virt: VirtualAddress,
        phys: PhysicalAddress,
        permissions: Permissions,
    ) -> Result<(), Error> {
        assert!(virt.is_aligned_to(PAGE_SIZE), "unaligned virtual address {virt}");
        assert!(phys.is_aligned_to(PAGE_SIZE), "unaligned physical address {phys}");

        let previous = self.translations.insert(virt, (phys, permissions));
        assert!(
            previous.is_none(),
            "translation for {virt} installed twice"
        );
        Ok(())
    }

    fn unmap_page(&mut self, virt: VirtualAddress) -> Result<PhysicalAddress, Error> {
        let (phys, _) = self
            .translations
            .remove(&virt)
            .unwrap_or_else(|| panic!("no translation installed for {virt}"));
        Ok(phys)
    }

    fn update_flags(
        &mut self,
        virt: VirtualAddress,
        permissions: Permissions,
    ) -> Result<(), Error> {
        let entry = self
            .translations
            .get_mut(&virt)
            .unwrap_or_else(|| panic!("no translation installed for {virt}"));
        entry.1 = permissions;
        Ok(())
    }

    fn invalidate_range(&mut self, range: Range<VirtualAddress>) {
        self.invalidations.push(range);
    }

    unsafe fn activate(&self) {}
}

const FRAME_BASE: usize = 0x8000_0000;

#[derive(Debug, Default)]
struct TestFrameAllocatorState {
    next: usize,
    allocated: usize,
    live: BTreeSet<PhysicalAddress>,
}

/// A frame allocator over fake physical addresses that tracks every frame it
/// handed out, with optional failure injection.
#[derive(Debug, Default)]
pub struct TestFrameAllocator {
    state: Mutex<TestFrameAllocatorState>,
    fail_after: Option<usize>,
}

impl TestFrameAllocator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an allocator whose allocations fail after `n` successes.
    #[must_use]
    pub fn failing_after(n: usize) -> Self {
        Self {
            state: Mutex::new(TestFrameAllocatorState::default()),
            fail_after: Some(n),
        }
    }

    /// The number of frames currently allocated and not yet freed.
    #[must_use]
    pub fn live_frames(&self) -> usize {
        self.state.lock().unwrap().live.len()
    }

    /// Leaks this allocator, yielding the `&'static` reference that vmos
    /// hold on to.
    #[must_use]
    pub fn leak(self) -> &'static Self {
        Box::leak(Box::new(self))
    }
}

impl FrameAllocator for TestFrameAllocator {
    fn allocate_frame(&self) -> Result<PhysicalAddress, AllocError> {
        let mut state = self.state.lock().unwrap();

        if let Some(limit) = self.fail_after
            && state.allocated >= limit
        {
            return Err(AllocError);
        }

        let frame = PhysicalAddress::new(FRAME_BASE + state.next * PAGE_SIZE);
        state.next += 1;
        state.allocated += 1;
        state.live.insert(frame);
        Ok(frame)
    }

    fn deallocate_frame(&self, frame: PhysicalAddress) {
        let mut state = self.state.lock().unwrap();
        assert!(
            state.live.remove(&frame),
            "freed a frame that was never allocated: {frame}"
        );
    }
}
