#![allow(dead_code, reason = "not every test binary uses every helper")]

use std::sync::Arc;

use vmspace::test_utils::{EmulatedAddressSpace, TestFrameAllocator};
use vmspace::{AddressSpace, ArchAddressSpace, VirtualAddress, Vmo, PAGE_SIZE};

pub const BASE: usize = 0x10_0000;

/// An address space over `pages` pages starting at [`BASE`], backed by the
/// emulated page table.
pub fn page_aspace(pages: usize) -> AddressSpace<EmulatedAddressSpace> {
    AddressSpace::new(
        EmulatedAddressSpace::new(),
        VirtualAddress::new(BASE)..VirtualAddress::new(BASE + pages * PAGE_SIZE),
    )
    .unwrap()
}

/// An address space over the full default user range.
pub fn user_aspace() -> AddressSpace<EmulatedAddressSpace> {
    AddressSpace::new(EmulatedAddressSpace::new(), vmspace::USER_ASPACE_RANGE).unwrap()
}

pub fn vmo_with(frame_alloc: &'static TestFrameAllocator, pages: usize) -> Arc<Vmo> {
    Arc::new(Vmo::allocate(frame_alloc, pages * PAGE_SIZE).unwrap())
}

/// Reconstructs the `(start, end, is_free)` region layout through the public
/// lookup API.
pub fn layout<A: ArchAddressSpace>(aspace: &AddressSpace<A>) -> Vec<(usize, usize, bool)> {
    let mut out = Vec::new();
    let mut cursor = aspace.range().start;
    while cursor < aspace.range().end {
        let region = aspace.lookup(cursor).unwrap();
        let range = region.range();
        out.push((range.start.get(), range.end.get(), region.is_free()));
        cursor = range.end;
    }
    out
}
