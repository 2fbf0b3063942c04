// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::ops::Range;
use core::{cmp, mem};

use crate::address::VirtualAddress;
use crate::arch::ArchAddressSpace;

/// Accumulates the virtual range whose translations were mutated during one
/// operation, so the TLB is invalidated once instead of per page.
#[must_use]
pub struct Flush {
    range: Option<Range<VirtualAddress>>,
}

impl Drop for Flush {
    fn drop(&mut self) {
        if self.range.is_some() {
            log::error!("dropped Flush without calling ignore/flush");
        }
    }
}

impl Flush {
    pub const fn empty() -> Self {
        Self { range: None }
    }

    pub fn range(&self) -> Option<&Range<VirtualAddress>> {
        self.range.as_ref()
    }

    /// Extends the pending range to include `other`.
    pub fn extend_range(&mut self, other: Range<VirtualAddress>) {
        if let Some(this) = self.range.take() {
            self.range = Some(Range {
                start: cmp::min(this.start, other.start),
                end: cmp::max(this.end, other.end),
            });
        } else {
            self.range = Some(other);
        }
    }

    /// Flushes the accumulated range of virtual addresses from the TLB.
    pub fn flush<A: ArchAddressSpace>(mut self, arch: &mut A) {
        if let Some(range) = self.range.take() {
            log::trace!("flushing range {}..{}", range.start, range.end);
            arch.invalidate_range(range);
        } else {
            log::warn!("attempted to flush empty range, ignoring");
        }
    }

    /// # Safety
    ///
    /// Not flushing after mutating the page translation tables will likely
    /// lead to unintended consequences such as inconsistent views of the
    /// address space between different harts.
    ///
    /// You should only call this if you know what you're doing.
    pub unsafe fn ignore(self) {
        mem::forget(self);
    }
}
