// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use alloc::sync::Arc;
use core::fmt;
use core::ops::Range;

use rbtree::{NodeId, RbTree};

use crate::address::{AddressRangeExt, VirtualAddress};
use crate::arch::ArchAddressSpace;
use crate::error::Error;
use crate::flush::Flush;
use crate::region::{Region, RegionKind};
use crate::vmo::Vmo;
use crate::{Placement, Permissions, PAGE_SIZE};

/// The virtual address space of one process (or the kernel itself).
///
/// A binary search tree of [`Region`]s partitions the managed range into
/// free and bound intervals with no gaps and no overlaps. Each tree node
/// caches the largest free region length in its subtree, so placing a new
/// mapping is a logarithmic descent rather than a scan.
///
/// All mutating operations take `&mut self` and run to completion; threads
/// sharing one address space serialize through
/// [`SharedAddressSpace`][crate::SharedAddressSpace].
pub struct AddressSpace<A> {
    regions: RbTree<Region>,
    /// The managed virtual range; everything outside is never handed out.
    range: Range<VirtualAddress>,
    /// The hardware address space backing this logical one; changes are
    /// materialized into it before any operation returns.
    arch: A,
    /// Bytes currently bound to backing memory.
    resident: usize,
}

impl<A: ArchAddressSpace> AddressSpace<A> {
    /// Creates an address space managing `range`, initially one single free
    /// region.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Misaligned`] unless both range ends are page
    /// aligned, and with [`Error::InvalidLength`] for an empty range.
    pub fn new(arch: A, range: Range<VirtualAddress>) -> Result<Self, Error> {
        if !range.start.is_aligned_to(PAGE_SIZE) || !range.end.is_aligned_to(PAGE_SIZE) {
            return Err(Error::Misaligned);
        }
        if range.is_empty() {
            return Err(Error::InvalidLength);
        }

        let mut regions = RbTree::new();
        regions.insert(Region::free(range.clone()));

        Ok(Self {
            regions,
            range,
            arch,
            resident: 0,
        })
    }

    pub fn range(&self) -> Range<VirtualAddress> {
        self.range.clone()
    }

    pub fn arch(&self) -> &A {
        &self.arch
    }

    /// Bytes currently bound to backing memory.
    pub fn resident_size(&self) -> usize {
        self.resident
    }

    /// Installs this address space's translation root on the executing core.
    ///
    /// # Safety
    ///
    /// Interrupts and preemption must be disabled for the duration of the
    /// call, see [`ArchAddressSpace::activate`].
    pub unsafe fn activate(&self) {
        // Safety: ensured by caller
        unsafe { self.arch.activate() }
    }

    /// Returns the region containing `address`, or `None` outside the
    /// managed range.
    pub fn lookup(&self, address: VirtualAddress) -> Option<&Region> {
        let id = self.regions.upper_bound(address)?;
        let region = self.regions.get(id);
        region.range().contains(&address).then_some(region)
    }

    /// Carves a free region of `length` bytes out of the address space.
    ///
    /// The search is first-fit in the preferred direction: `PreferLow`
    /// returns the start of the lowest sufficiently large free region,
    /// `PreferHigh` the end of the highest one. The returned region stays
    /// free; [`map`][AddressSpace::map] is what binds it.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::OutOfVirtualMemory`] if no free region of
    /// `length` bytes exists (in which case nothing was modified), and with
    /// [`Error::InvalidLength`] unless `length` is a non-zero multiple of
    /// the page size.
    pub fn allocate(&mut self, length: usize, placement: Placement) -> Result<&Region, Error> {
        let id = self.allocate_inner(length, placement)?;
        #[cfg(debug_assertions)]
        self.assert_invariants();
        Ok(self.regions.get(id))
    }

    /// Carves the exact range `[address, address + length)` out of a free
    /// region.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::RangeNotFree`] if any byte of the request is
    /// bound or outside the managed range, plus the usual alignment errors.
    pub fn allocate_at(
        &mut self,
        address: VirtualAddress,
        length: usize,
    ) -> Result<&Region, Error> {
        let id = self.allocate_at_inner(address, length)?;
        #[cfg(debug_assertions)]
        self.assert_invariants();
        Ok(self.regions.get(id))
    }

    /// Maps `length` bytes of `vmo` into this address space.
    ///
    /// Placement is resolved through [`allocate`][AddressSpace::allocate],
    /// or [`allocate_at`][AddressSpace::allocate_at] when `address` is given
    /// (in which case `placement` is ignored). The region is bound to the
    /// vmo and one translation per page is installed eagerly before this
    /// returns; there is no demand paging.
    ///
    /// `permissions` must be a valid (non write-execute) set.
    ///
    /// # Errors
    ///
    /// Fails with whatever placement failed with, and with
    /// [`Error::InvalidLength`] if `length` exceeds the vmo.
    ///
    /// # Panics
    ///
    /// Panics if the page-table adapter rejects a translation for the just
    /// validated range; that means the logical and hardware views have
    /// diverged and continuing would corrupt unrelated mappings.
    pub fn map(
        &mut self,
        vmo: Arc<Vmo>,
        address: Option<VirtualAddress>,
        length: usize,
        permissions: Permissions,
        placement: Placement,
    ) -> Result<VirtualAddress, Error> {
        if length == 0 || !length.is_multiple_of(PAGE_SIZE) || length > vmo.size() {
            return Err(Error::InvalidLength);
        }
        debug_assert!(
            permissions.is_valid(),
            "write-execute mappings are not allowed"
        );

        let id = match address {
            Some(address) => self.allocate_at_inner(address, length)?,
            None => self.allocate_inner(length, placement)?,
        };
        let range = self.regions.get(id).range();
        log::trace!("mapping {}..{} {permissions}", range.start, range.end);

        self.regions
            .with_mut(id, |region| region.bind(vmo.clone(), 0, permissions));

        // eagerly back the whole mapping; a rejected translation here means
        // the page tables disagree with a range we just validated
        let mut flush = Flush::empty();
        for index in 0..length / PAGE_SIZE {
            let virt = range
                .start
                .checked_add(index * PAGE_SIZE)
                .expect("page is inside the validated range");
            let phys = vmo.frame(index).expect("offset validated against the vmo");
            if let Err(err) = self.arch.map_page(virt, phys, permissions) {
                panic!("failed to install translation for {virt}: {err}");
            }
        }
        flush.extend_range(range.clone());
        flush.flush(&mut self.arch);

        self.resident += length;

        #[cfg(debug_assertions)]
        self.assert_invariants();

        Ok(range.start)
    }

    /// Unmaps `[address, address + length)`, converting every covered region
    /// back to free space and coalescing with free neighbors.
    ///
    /// The range must be exactly a union of whole bound regions; partial
    /// unmapping of a region is not supported.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::RangeNotMapped`] if any byte of the range is free,
    /// outside the managed range, or the range does not fall on region
    /// boundaries, plus the usual alignment errors. Nothing is modified in
    /// the error case.
    pub fn unmap(&mut self, address: VirtualAddress, length: usize) -> Result<(), Error> {
        if !address.is_aligned_to(PAGE_SIZE) {
            return Err(Error::Misaligned);
        }
        if length == 0 || !length.is_multiple_of(PAGE_SIZE) {
            return Err(Error::InvalidLength);
        }
        let end = address.checked_add(length).ok_or(Error::RangeNotMapped)?;
        if !self.range.contains_range(&(address..end)) {
            return Err(Error::RangeNotMapped);
        }

        let first = self.region_run(address, end)?;

        log::trace!("unmapping {address}..{end}");

        // convert every covered region back to free space and drop its
        // translations
        let mut flush = Flush::empty();
        let mut current = Some(first);
        while let Some(id) = current {
            let range = self.regions.get(id).range();
            if range.start >= end {
                break;
            }

            for index in 0..range.size() / PAGE_SIZE {
                let virt = range
                    .start
                    .checked_add(index * PAGE_SIZE)
                    .expect("page is inside the region");
                if let Err(err) = self.arch.unmap_page(virt) {
                    panic!("failed to remove translation for {virt}: {err}");
                }
            }

            self.regions.with_mut(id, |region| region.release());
            self.resident -= range.size();
            flush.extend_range(range);
            current = self.regions.next(id);
        }
        flush.flush(&mut self.arch);

        self.coalesce_around(first);

        #[cfg(debug_assertions)]
        self.assert_invariants();

        Ok(())
    }

    /// Reduces the permissions of every bound region in
    /// `[address, address + length)`.
    ///
    /// The range must be exactly a union of whole bound regions, and the new
    /// permissions must be a subset of every affected region's current ones.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::RangeNotMapped`] like
    /// [`unmap`][AddressSpace::unmap] and with [`Error::PermissionIncrease`]
    /// if the new permissions are not a subset. Nothing is modified in the
    /// error case.
    pub fn protect(
        &mut self,
        address: VirtualAddress,
        length: usize,
        new_permissions: Permissions,
    ) -> Result<(), Error> {
        if !address.is_aligned_to(PAGE_SIZE) {
            return Err(Error::Misaligned);
        }
        if length == 0 || !length.is_multiple_of(PAGE_SIZE) {
            return Err(Error::InvalidLength);
        }
        debug_assert!(new_permissions.is_valid());
        let end = address.checked_add(length).ok_or(Error::RangeNotMapped)?;
        if !self.range.contains_range(&(address..end)) {
            return Err(Error::RangeNotMapped);
        }

        let first = self.region_run(address, end)?;

        // permissions may only ever shrink
        let mut current = Some(first);
        while let Some(id) = current {
            let region = self.regions.get(id);
            if region.range().start >= end {
                break;
            }
            let RegionKind::Bound { permissions, .. } = region.kind() else {
                unreachable!("region run only yields bound regions");
            };
            if !permissions.contains(new_permissions) {
                return Err(Error::PermissionIncrease);
            }
            current = self.regions.next(id);
        }

        log::trace!("protecting {address}..{end} as {new_permissions}");

        let mut flush = Flush::empty();
        let mut current = Some(first);
        while let Some(id) = current {
            let range = self.regions.get(id).range();
            if range.start >= end {
                break;
            }

            self.regions
                .with_mut(id, |region| region.set_permissions(new_permissions));
            for index in 0..range.size() / PAGE_SIZE {
                let virt = range
                    .start
                    .checked_add(index * PAGE_SIZE)
                    .expect("page is inside the region");
                if let Err(err) = self.arch.update_flags(virt, new_permissions) {
                    panic!("failed to update permissions for {virt}: {err}");
                }
            }
            flush.extend_range(range);
            current = self.regions.next(id);
        }
        flush.flush(&mut self.arch);

        #[cfg(debug_assertions)]
        self.assert_invariants();

        Ok(())
    }

    /// Asserts the coverage invariant (the regions partition the managed
    /// range, ordered, without gaps or overlaps) and every tree invariant.
    ///
    /// # Panics
    ///
    /// Panics on the first violation found. A violation is a kernel bug,
    /// never a caller error, so this must not be turned into a `Result`.
    pub fn assert_invariants(&self) {
        self.regions.assert_invariants();

        let mut expected = self.range.start;
        let mut resident = 0;
        for (_, region) in self.regions.iter() {
            let range = region.range();
            assert_eq!(range.start, expected, "coverage gap or overlap at {expected}");
            assert!(range.start < range.end, "empty region at {}", range.start);
            if !region.is_free() {
                resident += range.size();
            }
            expected = range.end;
        }
        assert_eq!(
            expected, self.range.end,
            "regions stop short of the managed range"
        );
        assert_eq!(resident, self.resident, "resident byte counter out of sync");
    }

    fn allocate_inner(&mut self, length: usize, placement: Placement) -> Result<NodeId, Error> {
        if length == 0 || !length.is_multiple_of(PAGE_SIZE) {
            return Err(Error::InvalidLength);
        }

        let root = self.regions.root().expect("address space tree is never empty");
        if self.regions.aggregate(root) < length {
            return Err(Error::OutOfVirtualMemory);
        }

        log::trace!("allocating {length:#x} bytes ({placement:?})");

        // first-fit in the preferred direction: the cached largest-free-length
        // per subtree tells us which turns can still satisfy the request
        let mut current = root;
        loop {
            match placement {
                Placement::PreferLow => {
                    if let Some(left) = self.regions.left(current)
                        && self.regions.aggregate(left) >= length
                    {
                        current = left;
                        continue;
                    }

                    let region = self.regions.get(current);
                    if region.is_free() && region.range().size() >= length {
                        return Ok(self.split_free(current, 0, length));
                    }

                    let right = self
                        .regions
                        .right(current)
                        .expect("aggregate promised a fitting free region below this node");
                    debug_assert!(self.regions.aggregate(right) >= length);
                    current = right;
                }
                Placement::PreferHigh => {
                    if let Some(right) = self.regions.right(current)
                        && self.regions.aggregate(right) >= length
                    {
                        current = right;
                        continue;
                    }

                    let region = self.regions.get(current);
                    let size = region.range().size();
                    if region.is_free() && size >= length {
                        return Ok(self.split_free(current, size - length, length));
                    }

                    let left = self
                        .regions
                        .left(current)
                        .expect("aggregate promised a fitting free region below this node");
                    debug_assert!(self.regions.aggregate(left) >= length);
                    current = left;
                }
            }
        }
    }

    fn allocate_at_inner(
        &mut self,
        address: VirtualAddress,
        length: usize,
    ) -> Result<NodeId, Error> {
        if !address.is_aligned_to(PAGE_SIZE) {
            return Err(Error::Misaligned);
        }
        if length == 0 || !length.is_multiple_of(PAGE_SIZE) {
            return Err(Error::InvalidLength);
        }
        let end = address.checked_add(length).ok_or(Error::RangeNotFree)?;
        if !self.range.contains_range(&(address..end)) {
            return Err(Error::RangeNotFree);
        }

        let id = self
            .regions
            .upper_bound(address)
            .expect("managed range is fully covered by regions");
        let region = self.regions.get(id);
        debug_assert!(region.range().contains(&address));
        if !region.is_free() || end > region.range().end {
            return Err(Error::RangeNotFree);
        }

        let offset = address
            .checked_sub_addr(region.range().start)
            .expect("containing region starts at or below the address");
        Ok(self.split_free(id, offset, length))
    }

    /// Carves `[offset, offset + length)` out of the free region `id`,
    /// returning the node holding exactly the carved range.
    ///
    /// Depending on where the carved range falls this reuses the node as-is,
    /// shrinks it to one remainder, or inserts up to two new remainder nodes.
    /// Subtree aggregates are refreshed bottom-up after every structural
    /// change.
    fn split_free(&mut self, id: NodeId, offset: usize, length: usize) -> NodeId {
        let range = self.regions.get(id).range();
        let size = range.size();
        debug_assert!(self.regions.get(id).is_free());
        debug_assert!(length != 0 && offset + length <= size);

        if offset == 0 && length == size {
            // exact fit, no split needed
            return id;
        }

        if offset == 0 {
            // shrink the node to the trailing remainder and insert the carved
            // head as its new lower neighbor
            let mid = range
                .start
                .checked_add(length)
                .expect("carved range is inside the region");
            self.regions
                .with_mut(id, |region| region.set_range(mid..range.end));
            return self.regions.insert(Region::free(range.start..mid));
        }

        let carve_start = range
            .start
            .checked_add(offset)
            .expect("carved range is inside the region");
        let carve_end = carve_start
            .checked_add(length)
            .expect("carved range is inside the region");

        // the node keeps the leading remainder
        self.regions
            .with_mut(id, |region| region.set_range(range.start..carve_start));
        if carve_end < range.end {
            self.regions.insert(Region::free(carve_end..range.end));
        }
        self.regions.insert(Region::free(carve_start..carve_end))
    }

    /// Verifies that `[start, end)` is exactly a union of whole bound
    /// regions and returns the first of them. Read-only.
    fn region_run(&self, start: VirtualAddress, end: VirtualAddress) -> Result<NodeId, Error> {
        let first = self
            .regions
            .upper_bound(start)
            .expect("managed range is fully covered by regions");
        if self.regions.get(first).range().start != start {
            return Err(Error::RangeNotMapped);
        }

        let mut covered = start;
        let mut current = Some(first);
        while covered < end {
            let id = current.expect("managed range is fully covered by regions");
            let region = self.regions.get(id);
            if region.is_free() {
                return Err(Error::RangeNotMapped);
            }
            covered = region.range().end;
            current = self.regions.next(id);
        }
        if covered != end {
            return Err(Error::RangeNotMapped);
        }

        Ok(first)
    }

    /// Merges the free region `id` with free neighbors on both flanks,
    /// removing the now-redundant nodes.
    fn coalesce_around(&mut self, id: NodeId) {
        debug_assert!(self.regions.get(id).is_free());

        let mut survivor = id;
        if let Some(prev) = self.regions.prev(id)
            && self.regions.get(prev).is_free()
        {
            survivor = prev;
        }

        while let Some(next) = self.regions.next(survivor)
            && self.regions.get(next).is_free()
        {
            let absorbed = self.regions.get(next).range();
            let start = self.regions.get(survivor).range().start;
            debug_assert_eq!(
                self.regions.get(survivor).range().end,
                absorbed.start,
                "adjacent regions must stay contiguous"
            );
            self.regions.remove(next);
            self.regions
                .with_mut(survivor, |region| region.set_range(start..absorbed.end));
        }
    }
}

impl<A> fmt::Debug for AddressSpace<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        struct Regions<'a>(&'a RbTree<Region>);

        impl fmt::Debug for Regions<'_> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_list()
                    .entries(self.0.iter().map(|(_, region)| region))
                    .finish()
            }
        }

        f.debug_struct("AddressSpace")
            .field("range", &self.range)
            .field("resident", &self.resident)
            .field("regions", &Regions(&self.regions))
            .finish_non_exhaustive()
    }
}
