// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::ops::Range;

use crate::address::{PhysicalAddress, VirtualAddress};
use crate::error::Error;
use crate::Permissions;

/// The hardware page-table side of an address space.
///
/// [`AddressSpace`][crate::AddressSpace] keeps the logical region tree and
/// this adapter in lockstep: every bind/unbind of a region is materialized
/// into translations here before the operation returns. All addresses passed
/// in are page aligned and inside the managed range.
pub trait ArchAddressSpace {
    /// Installs the translation for a single page.
    ///
    /// # Errors
    ///
    /// Returns an error if the translation could not be installed, e.g.
    /// because allocating an intermediate page table failed.
    fn map_page(
        &mut self,
        virt: VirtualAddress,
        phys: PhysicalAddress,
        permissions: Permissions,
    ) -> Result<(), Error>;

    /// Removes the translation for a single page, returning the physical
    /// address it pointed at.
    ///
    /// # Errors
    ///
    /// Returns an error if no translation exists for `virt`.
    fn unmap_page(&mut self, virt: VirtualAddress) -> Result<PhysicalAddress, Error>;

    /// Replaces the permissions of an existing translation.
    ///
    /// # Errors
    ///
    /// Returns an error if no translation exists for `virt`.
    fn update_flags(
        &mut self,
        virt: VirtualAddress,
        permissions: Permissions,
    ) -> Result<(), Error>;

    /// Flushes possibly stale translations for `range` from the TLB.
    ///
    /// Called through [`Flush`][crate::Flush] after every batch of mutations.
    fn invalidate_range(&mut self, range: Range<VirtualAddress>);

    /// Installs this address space's translation root on the executing core.
    ///
    /// # Safety
    ///
    /// Interrupts and preemption must be disabled for the duration of the
    /// call; an interrupt handler observing a partially installed
    /// translation root would see an inconsistent address space.
    unsafe fn activate(&self);
}
