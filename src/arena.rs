//! [`Arena`] trait and structures that implement it.
//!
//! An arena is the single contiguous buffer a [`MemorySystem`](crate::MemorySystem) carves
//! into pools and a heap. It is reserved in full before the system is built and released
//! only after the system is gone; nothing in this crate asks for more memory mid-run.

use core::mem::size_of;
use core::ptr::{null_mut, slice_from_raw_parts_mut, NonNull};

use libc::{mmap, munmap, MAP_ANONYMOUS, MAP_FAILED, MAP_PRIVATE, PROT_READ, PROT_WRITE};
use snafu::ensure;
use tracing::{debug, instrument, Level};

use crate::error::{InvalidArgumentSnafu, OutOfMemorySnafu, Result};
use crate::region::Region;

/// A type that owns one contiguous, fixed-size buffer.
///
/// # Safety
/// Implementors must hand out the same region for their whole lifetime, keep it valid for
/// reads and writes until they are dropped and never access it themselves.
pub unsafe trait Arena {
    /// Returns the window over the arena's memory.
    ///
    /// # Safety
    /// Callers must not use the returned region, or anything derived from it,
    /// after the arena has been dropped, and must not create two systems over it.
    unsafe fn region(&self) -> Region;
}

/// An arena reserved straight from the operating system with [`libc::mmap`]
/// and returned with [`libc::munmap`] when dropped.
#[derive(Debug)]
pub struct MmapArena {
    region: Region,
}

impl MmapArena {
    /// Reserves `size` bytes of zeroed, private, anonymous memory.
    #[instrument(level = "debug", err(Debug, level = Level::ERROR))]
    pub fn reserve(size: usize) -> Result<Self> {
        ensure!(size != 0, InvalidArgumentSnafu { reason: "zero-size arena" });

        let p = unsafe {
            mmap(
                null_mut(),
                size,
                PROT_READ | PROT_WRITE,
                MAP_PRIVATE | MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if p == MAP_FAILED {
            return OutOfMemorySnafu { size }.fail();
        }

        let region = unsafe { Region::from_raw_parts(p.cast(), size)? };
        debug!(?region, "Reserved arena.");
        Ok(MmapArena { region })
    }
}

unsafe impl Arena for MmapArena {
    unsafe fn region(&self) -> Region {
        self.region
    }
}

impl Drop for MmapArena {
    fn drop(&mut self) {
        let rc = unsafe { munmap(self.region.base().as_ptr().cast(), self.region.len()) };
        debug_assert_eq!(rc, 0, "Unmapping a reserved arena should never fail.");
    }
}

/// An arena carved out of the process heap, zero-initialised and word-aligned.
///
/// Handy for tests and for running a [`MemorySystem`](crate::MemorySystem)
/// next to the process's own allocator.
#[derive(Debug)]
pub struct BoxedArena {
    words: NonNull<u64>,
    word_count: usize,
    region: Region,
}

impl BoxedArena {
    /// Allocates an arena of `size` bytes.
    pub fn new(size: usize) -> Result<Self> {
        ensure!(size != 0, InvalidArgumentSnafu { reason: "zero-size arena" });

        let word_count = size.div_ceil(size_of::<u64>());
        let buf: Box<[u64]> = vec![0; word_count].into_boxed_slice();
        let p = Box::into_raw(buf).cast::<u64>();
        let region = unsafe { Region::from_raw_parts(p.cast(), size)? };
        // Box pointers are never null.
        let words = unsafe { NonNull::new_unchecked(p) };
        Ok(BoxedArena {
            words,
            word_count,
            region,
        })
    }
}

// The buffer is uniquely owned, just like the box it came from.
unsafe impl Send for BoxedArena {}

unsafe impl Arena for BoxedArena {
    unsafe fn region(&self) -> Region {
        self.region
    }
}

impl Drop for BoxedArena {
    fn drop(&mut self) {
        drop(unsafe {
            Box::from_raw(slice_from_raw_parts_mut(
                self.words.as_ptr(),
                self.word_count,
            ))
        });
    }
}
