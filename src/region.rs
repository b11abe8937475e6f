//! Defines [`Region`], a bounds-checked window over raw memory.
//!
//! The allocators never dereference raw pointers themselves. They address arena memory
//! by offset through a `Region`, which is the one place where those offsets are turned
//! into pointers and read from or written to.

use core::fmt;
use core::mem::size_of;
use core::ptr::NonNull;

use snafu::{ensure, OptionExt};

use crate::error::{InvalidArgumentSnafu, Result};

/// A contiguous range of raw memory addressed by byte offsets.
///
/// A `Region` does not own its memory. It is `Copy` because it is nothing more than
/// an address range, much like a raw pointer; splitting it hands out disjoint windows.
/// Out-of-bounds accesses panic: they are allocator bugs, never caller input.
///
/// Only the allocator a region is handed to reads or writes through it. Outside this crate
/// a region names memory but can't touch it:
/// ```compile_fail
/// use memsys::arena::{Arena, BoxedArena};
///
/// let arena = BoxedArena::new(64).unwrap();
/// let region = unsafe { arena.region() };
/// region.write(0, 1_u64);
/// ```
///
/// Allocators don't give their region back out either, only its address range:
/// ```compile_fail
/// use memsys::arena::{Arena, BoxedArena};
/// use memsys::{MemoryConfig, MemorySystem};
///
/// let arena = BoxedArena::new(1 << 20).unwrap();
/// let system = MemorySystem::new(unsafe { arena.region() }, &MemoryConfig::DEFAULT).unwrap();
/// let region = system.heap().region();
/// ```
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Region {
    base: NonNull<u8>,
    len: usize,
}

// The memory behind a region is exclusively owned by whoever holds the region,
// as promised to `from_raw_parts`.
unsafe impl Send for Region {}

impl Region {
    /// Creates a region spanning `len` bytes from `base`.
    /// Returns [`InvalidArgument`](crate::MemoryError::InvalidArgument) if `base` is null
    /// or the range would wrap around the address space.
    ///
    /// # Safety
    /// `base..base + len` must be valid for reads and writes and must not be accessed
    /// other than through this region (or copies and subregions of it) for as long as
    /// any of them is in use. The region, its copies and its subregions together may back
    /// at most one allocator or system at a time.
    pub unsafe fn from_raw_parts(base: *mut u8, len: usize) -> Result<Self> {
        let base = NonNull::new(base).context(InvalidArgumentSnafu {
            reason: "null arena",
        })?;
        ensure!(
            (base.as_ptr() as usize).checked_add(len).is_some(),
            InvalidArgumentSnafu {
                reason: "arena wraps around the address space"
            }
        );
        Ok(Region { base, len })
    }

    #[inline(always)]
    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    /// The address of the first byte.
    #[inline(always)]
    pub fn addr(&self) -> usize {
        self.base.as_ptr() as usize
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The address one past the last byte.
    #[inline(always)]
    pub fn end_addr(&self) -> usize {
        self.addr() + self.len
    }

    /// Returns whether `ptr` points into the region.
    #[inline]
    pub fn contains(&self, ptr: *const u8) -> bool {
        let addr = ptr as usize;
        addr >= self.addr() && addr < self.end_addr()
    }

    /// Translates `ptr` into an offset, or `None` if it points outside the region.
    #[inline]
    pub fn offset_of(&self, ptr: *const u8) -> Option<usize> {
        self.contains(ptr).then(|| ptr as usize - self.addr())
    }

    /// Returns a pointer `offset` bytes into the region. `offset == len()` yields the end pointer.
    #[track_caller]
    pub fn ptr_at(&self, offset: usize) -> NonNull<u8> {
        assert!(
            offset <= self.len,
            "Offset {offset} is outside of a region of {} bytes.",
            self.len
        );
        // Non-null since `base` is and the range does not wrap.
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(offset)) }
    }

    /// Splits the region into `[0, mid)` and `[mid, len)`.
    #[track_caller]
    pub fn split_at(self, mid: usize) -> (Region, Region) {
        let tail = Region {
            base: self.ptr_at(mid),
            len: self.len - mid,
        };
        (Region { base: self.base, len: mid }, tail)
    }

    /// Returns the window `[offset, offset + len)`.
    #[track_caller]
    pub fn subregion(&self, offset: usize, len: usize) -> Region {
        self.check_range(offset, len);
        Region {
            base: self.ptr_at(offset),
            len,
        }
    }

    /// Reads a `T` stored at `offset`.
    #[track_caller]
    #[inline]
    pub(crate) fn read<T: Copy>(&self, offset: usize) -> T {
        self.check_range(offset, size_of::<T>());
        unsafe { self.base.as_ptr().add(offset).cast::<T>().read_unaligned() }
    }

    /// Stores `value` at `offset`.
    #[track_caller]
    #[inline]
    pub(crate) fn write<T: Copy>(&self, offset: usize, value: T) {
        self.check_range(offset, size_of::<T>());
        unsafe { self.base.as_ptr().add(offset).cast::<T>().write_unaligned(value) }
    }

    /// Sets `len` bytes starting at `offset` to `byte`.
    #[track_caller]
    pub(crate) fn fill(&self, offset: usize, len: usize, byte: u8) {
        self.check_range(offset, len);
        unsafe { self.base.as_ptr().add(offset).write_bytes(byte, len) }
    }

    #[track_caller]
    #[inline(always)]
    fn check_range(&self, offset: usize, len: usize) {
        assert!(
            offset.checked_add(len).is_some_and(|end| end <= self.len),
            "Access of {len} bytes at offset {offset} overruns a region of {} bytes.",
            self.len
        );
    }
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Region({:#x}..{:#x})", self.addr(), self.end_addr())
    }
}
