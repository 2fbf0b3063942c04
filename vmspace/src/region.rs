// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use alloc::sync::Arc;
use core::fmt;
use core::ops::Range;

use crate::address::{AddressRangeExt, VirtualAddress};
use crate::vmo::Vmo;
use crate::Permissions;

/// What a region's bytes currently are.
#[derive(Debug, Clone)]
pub enum RegionKind {
    /// Unbacked address space, available for allocation.
    Free,
    /// Bound to a [`Vmo`] at `vmo_offset` with the given permissions.
    Bound {
        vmo: Arc<Vmo>,
        vmo_offset: usize,
        permissions: Permissions,
    },
}

/// One contiguous, non-empty interval of an address space.
///
/// The regions of an address space partition its managed range: every byte
/// belongs to exactly one region, either free or bound. Structural bookkeeping
/// (tree links, color, subtree aggregate, neighbors) lives in the containing
/// tree, not here.
#[derive(Clone)]
pub struct Region {
    range: Range<VirtualAddress>,
    kind: RegionKind,
}

impl Region {
    pub(crate) fn free(range: Range<VirtualAddress>) -> Self {
        debug_assert!(range.start < range.end, "regions must not be empty");
        Self {
            range,
            kind: RegionKind::Free,
        }
    }

    #[must_use]
    pub fn range(&self) -> Range<VirtualAddress> {
        self.range.clone()
    }

    #[must_use]
    pub fn kind(&self) -> &RegionKind {
        &self.kind
    }

    #[must_use]
    pub fn is_free(&self) -> bool {
        matches!(self.kind, RegionKind::Free)
    }

    fn free_len(&self) -> usize {
        if self.is_free() { self.range.size() } else { 0 }
    }

    pub(crate) fn set_range(&mut self, range: Range<VirtualAddress>) {
        debug_assert!(range.start < range.end, "regions must not be empty");
        self.range = range;
    }

    pub(crate) fn bind(&mut self, vmo: Arc<Vmo>, vmo_offset: usize, permissions: Permissions) {
        debug_assert!(self.is_free(), "binding an already bound region");
        self.kind = RegionKind::Bound {
            vmo,
            vmo_offset,
            permissions,
        };
    }

    pub(crate) fn release(&mut self) {
        debug_assert!(!self.is_free(), "releasing a free region");
        self.kind = RegionKind::Free;
    }

    pub(crate) fn set_permissions(&mut self, new_permissions: Permissions) {
        let RegionKind::Bound { permissions, .. } = &mut self.kind else {
            unreachable!("free regions have no permissions")
        };
        *permissions = new_permissions;
    }
}

impl rbtree::Node for Region {
    type Key = VirtualAddress;
    type Aggregate = usize;

    fn key(&self) -> VirtualAddress {
        self.range.start
    }

    /// The largest free region length anywhere in this subtree; this is what
    /// makes allocation a logarithmic descent instead of a linear scan.
    fn aggregate(&self, left: Option<usize>, right: Option<usize>) -> usize {
        self.free_len()
            .max(left.unwrap_or(0))
            .max(right.unwrap_or(0))
    }
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            RegionKind::Free => {
                write!(f, "{}..{} free", self.range.start, self.range.end)
            }
            RegionKind::Bound {
                vmo,
                vmo_offset,
                permissions,
            } => write!(
                f,
                "{}..{} {} {:?}+{vmo_offset:#x}",
                self.range.start, self.range.end, permissions, vmo
            ),
        }
    }
}
