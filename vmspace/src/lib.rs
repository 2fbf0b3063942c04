// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Per-address-space virtual memory management.
//!
//! An [`AddressSpace`] tracks which parts of a process's virtual address
//! range are free and which are bound to backing memory, as a tree of
//! [`Region`]s that partitions the managed range with no gaps. Allocation is
//! a logarithmic descent guided by a largest-free-length aggregate cached per
//! subtree; freeing coalesces neighbors back into larger free regions.
//!
//! Backing memory is described by [`Vmo`]s, reference-counted objects owning
//! physical frames obtained from a [`FrameAllocator`] (or wrapping externally
//! owned frames such as MMIO apertures). Mappings are eagerly backed: `map`
//! installs one translation per page through the [`ArchAddressSpace`] seam
//! before it returns. There is no demand paging and no copy-on-write.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

mod address;
mod address_space;
mod arch;
mod error;
mod flush;
mod frame_alloc;
mod region;
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;
mod vmo;

use core::fmt;
use core::ops::Range;

pub use address::{AddressRangeExt, PhysicalAddress, VirtualAddress};
pub use address_space::AddressSpace;
pub use arch::ArchAddressSpace;
pub use error::Error;
pub use flush::Flush;
pub use frame_alloc::{AllocError, BootstrapAllocator, FrameAllocator};
pub use region::{Region, RegionKind};
pub use vmo::{FrameRef, Vmo};

pub const KIB: usize = 1024;
pub const MIB: usize = KIB * 1024;
pub const GIB: usize = MIB * 1024;

/// The smallest granule of address space management.
pub const PAGE_SIZE: usize = 4 * KIB;

/// The default managed range for user address spaces.
///
/// Starts above the lowest 1 MiB (which stays unmanaged so null and
/// near-null dereferences can never be mapped) and ends at the 2^47
/// canonical boundary.
pub const USER_ASPACE_RANGE: Range<VirtualAddress> =
    VirtualAddress::new(0x10_0000)..VirtualAddress::new(0x8000_0000_0000);

bitflags::bitflags! {
    /// Access permissions of a bound region.
    #[derive(Debug, Copy, Clone, Hash, PartialEq, Eq)]
    pub struct Permissions: u8 {
        /// Allow reads from the memory region
        const READ = 1 << 0;
        /// Allow writes to the memory region
        const WRITE = 1 << 1;
        /// Allow code execution from the memory region
        const EXECUTE = 1 << 2;
        /// Allow userspace to access the memory region
        const USER = 1 << 3;
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        bitflags::parser::to_writer(self, f)
    }
}

impl Permissions {
    /// Returns whether the set of permissions is `R^X` ie doesn't allow
    /// write-execute at the same time.
    pub fn is_valid(self) -> bool {
        !self.contains(Permissions::WRITE | Permissions::EXECUTE)
    }
}

/// Placement policy for variable-address allocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Carve from the start of the lowest-addressed sufficiently large free
    /// region.
    PreferLow,
    /// Carve from the end of the highest-addressed sufficiently large free
    /// region.
    PreferHigh,
}

/// An address space behind the mutual-exclusion lock shared by all threads
/// of the owning process.
///
/// Mutating operations on [`AddressSpace`] take `&mut self`, so exclusion is
/// already compiler-enforced for a single owner; this wrapper provides the
/// canonical runtime lock for the cross-thread case. `lookup` also goes
/// through the lock since the tree is not safely readable mid-rotation.
pub struct SharedAddressSpace<A: ArchAddressSpace> {
    inner: spin::Mutex<AddressSpace<A>>,
}

impl<A: ArchAddressSpace> SharedAddressSpace<A> {
    pub fn new(aspace: AddressSpace<A>) -> Self {
        Self {
            inner: spin::Mutex::new(aspace),
        }
    }

    /// Runs `f` with exclusive access to the address space.
    pub fn with<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut AddressSpace<A>) -> R,
    {
        let mut aspace = self.inner.lock();
        f(&mut aspace)
    }

    /// Installs this address space's translation root on the executing core.
    ///
    /// # Safety
    ///
    /// Interrupts and preemption must be disabled for the duration of the
    /// call; an interrupt handler observing a partially installed
    /// translation root would see an inconsistent address space.
    pub unsafe fn activate(&self) {
        let aspace = self.inner.lock();
        // Safety: ensured by caller
        unsafe { aspace.activate() }
    }
}
