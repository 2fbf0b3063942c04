// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use alloc::vec::Vec;
use core::fmt;

use crate::address::PhysicalAddress;
use crate::error::Error;
use crate::frame_alloc::FrameAllocator;
use crate::PAGE_SIZE;

/// A single physical frame held by a [`Vmo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameRef {
    /// A frame obtained from the [`FrameAllocator`], returned to it when the
    /// vmo is dropped.
    Owned(PhysicalAddress),
    /// An externally owned frame (e.g. a device BAR page) that is never
    /// freed by this crate.
    External(PhysicalAddress),
}

impl FrameRef {
    #[must_use]
    pub fn addr(self) -> PhysicalAddress {
        match self {
            FrameRef::Owned(addr) | FrameRef::External(addr) => addr,
        }
    }
}

/// A virtual memory object: the ordered sequence of physical frames backing
/// one or more bound regions.
///
/// Vmos grow monotonically, one page at a time, and are shared between
/// regions through `Arc`; the frames live until the last reference is
/// dropped.
pub struct Vmo {
    frames: Vec<FrameRef>,
    frame_alloc: &'static dyn FrameAllocator,
}

impl fmt::Debug for Vmo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vmo")
            .field("frames", &self.frames.len())
            .field("size", &self.size())
            .finish_non_exhaustive()
    }
}

impl Vmo {
    /// Creates a new, empty vmo.
    #[must_use]
    pub fn new(frame_alloc: &'static dyn FrameAllocator) -> Self {
        Self {
            frames: Vec::new(),
            frame_alloc,
        }
    }

    /// Creates a vmo backed by `size` bytes of freshly allocated physical
    /// memory.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidLength`] unless `size` is a non-zero
    /// multiple of the page size and with [`Error::OutOfPhysicalMemory`] if
    /// the frame allocator is exhausted.
    pub fn allocate(frame_alloc: &'static dyn FrameAllocator, size: usize) -> Result<Self, Error> {
        if size == 0 || !size.is_multiple_of(PAGE_SIZE) {
            return Err(Error::InvalidLength);
        }

        let mut vmo = Self::new(frame_alloc);
        vmo.grow(size / PAGE_SIZE)?;
        Ok(vmo)
    }

    /// Appends `by_pages` freshly allocated frames, one at a time.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::OutOfPhysicalMemory`] if the frame allocator runs
    /// dry part way; frames appended before the failing allocation remain
    /// part of the vmo. Callers must treat the error as fatal to their
    /// operation rather than expect a rollback.
    pub fn grow(&mut self, by_pages: usize) -> Result<(), Error> {
        for _ in 0..by_pages {
            let frame = self.frame_alloc.allocate_frame()?;
            debug_assert!(frame.is_aligned_to(PAGE_SIZE));
            self.frames.push(FrameRef::Owned(frame));
        }
        Ok(())
    }

    /// Appends a frame that is not owned by the frame allocator, for
    /// memory-mapped I/O apertures.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Misaligned`] if `frame` is not page aligned.
    pub fn bind_external_frame(&mut self, frame: PhysicalAddress) -> Result<(), Error> {
        if !frame.is_aligned_to(PAGE_SIZE) {
            return Err(Error::Misaligned);
        }
        self.frames.push(FrameRef::External(frame));
        Ok(())
    }

    /// Returns the physical address of the `index`th frame.
    #[must_use]
    pub fn frame(&self, index: usize) -> Option<PhysicalAddress> {
        self.frames.get(index).map(|frame| frame.addr())
    }

    /// The size of this vmo in bytes, always a multiple of the page size.
    #[must_use]
    pub fn size(&self) -> usize {
        self.frames.len() * PAGE_SIZE
    }
}

impl Drop for Vmo {
    fn drop(&mut self) {
        for frame in &self.frames {
            if let FrameRef::Owned(addr) = frame {
                self.frame_alloc.deallocate_frame(*addr);
            }
        }
    }
}
