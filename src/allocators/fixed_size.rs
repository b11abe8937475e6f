//! A pool of equal-size blocks tracked by a [`Bitmap`].
//!
//! The pool's region starts with the bitmap words, followed by `block_count` blocks laid
//! out back to back. With guard bands enabled every block is framed by two
//! [`GUARD_PATTERN`] sentinels:
//!
//! ```text
//! | bitmap | guard | payload (block_size) | guard | guard | payload | guard | ...
//! ```

use core::mem::{align_of, size_of};
use core::ops::Range;
use core::ptr::NonNull;

use snafu::{ensure, OptionExt};
use tracing::{debug, instrument, warn, Level};

use crate::bitmap::Bitmap;
use crate::error::{
    ArenaTooSmallSnafu, CorruptionDetectedSnafu, InvalidArgumentSnafu, NotOwnedSnafu,
    OutOfMemorySnafu, Result,
};
use crate::region::Region;
use crate::util::{align_up, alignment_of};

/// Width of one guard band in bytes.
pub const GUARD_SIZE: usize = size_of::<u32>();

/// Sentinel written into both guard bands of an allocated block.
pub const GUARD_PATTERN: u32 = 0xDEAD_BEEF;

/// A slab allocator handing out blocks of one size from a fixed region.
///
/// Allocation always picks the lowest free index, so the pool fills from its start
/// and behaves deterministically. The region is borrowed from whoever built the pool
/// and is never released by it.
#[derive(Debug)]
pub struct FixedSizeAllocator {
    blocks: Region,
    bitmap: Bitmap,
    block_size: usize,
    block_count: usize,
    free_count: usize,
    guard_size: usize,
}

impl FixedSizeAllocator {
    /// Distance between two consecutive blocks, or `None` if it doesn't fit in a `usize`.
    #[inline]
    pub const fn stride_for(block_size: usize, guard_bands: bool) -> Option<usize> {
        match guard_bands {
            true => block_size.checked_add(2 * GUARD_SIZE),
            false => Some(block_size),
        }
    }

    /// Returns how many bytes of arena a pool with these parameters occupies,
    /// rounded up to the machine word so that pools can be stacked back to back,
    /// or `None` if that number overflows.
    pub fn footprint(block_size: usize, block_count: usize, guard_bands: bool) -> Option<usize> {
        let blocks = Self::stride_for(block_size, guard_bands)?.checked_mul(block_count)?;
        let total = Bitmap::storage_size(block_count).checked_add(blocks)?;
        align_up(total, align_of::<usize>())
    }

    /// Creates a pool of `block_count` blocks of `block_size` bytes at the front of `region`.
    #[instrument(level = "debug", err(Debug, level = Level::ERROR))]
    pub fn new(
        region: Region,
        block_size: usize,
        block_count: usize,
        guard_bands: bool,
    ) -> Result<Self> {
        ensure!(block_size != 0, InvalidArgumentSnafu { reason: "zero block size" });
        ensure!(block_count != 0, InvalidArgumentSnafu { reason: "zero block count" });

        let stride = Self::stride_for(block_size, guard_bands).context(InvalidArgumentSnafu {
            reason: "block size overflows with guard bands",
        })?;
        let required = Self::footprint(block_size, block_count, guard_bands).context(
            InvalidArgumentSnafu {
                reason: "pool does not fit in the address space",
            },
        )?;
        ensure!(
            region.len() >= required,
            ArenaTooSmallSnafu {
                required,
                available: region.len(),
            }
        );

        let (bitmap_storage, rest) = region.split_at(Bitmap::storage_size(block_count));
        let bitmap = Bitmap::new(bitmap_storage, block_count, true)?;
        let blocks = rest.subregion(0, stride * block_count);

        debug!(?blocks, stride, "Created fixed-size pool.");
        Ok(FixedSizeAllocator {
            blocks,
            bitmap,
            block_size,
            block_count,
            free_count: block_count,
            guard_size: if guard_bands { GUARD_SIZE } else { 0 },
        })
    }

    /// Hands out the free block with the lowest index.
    pub fn alloc(&mut self) -> Result<NonNull<u8>> {
        let size = self.block_size;
        ensure!(self.free_count != 0, OutOfMemorySnafu { size });

        let index = self.bitmap.find_first_clear().context(OutOfMemorySnafu { size })?;
        self.bitmap.set(index);
        self.free_count -= 1;

        let block = index * self.stride();
        if self.guard_size != 0 {
            self.blocks.write(block, GUARD_PATTERN);
            self.blocks.write(block + GUARD_SIZE + self.block_size, GUARD_PATTERN);
        }

        debug!(index, free_count = self.free_count, "Handed out pool block.");
        Ok(self.blocks.ptr_at(block + self.guard_size))
    }

    /// Returns the block whose payload starts at `ptr` to the pool.
    ///
    /// Pointers outside the pool, pointers into the middle of a block and blocks that
    /// are not allocated are refused with [`NotOwned`](crate::MemoryError::NotOwned).
    /// A block whose guard bands were overwritten is refused with
    /// [`CorruptionDetected`](crate::MemoryError::CorruptionDetected) and stays allocated.
    pub fn free(&mut self, ptr: *const u8) -> Result<()> {
        let addr = ptr as usize;
        let index = self.payload_index(ptr).context(NotOwnedSnafu { addr })?;
        ensure!(self.bitmap.is_set(index), NotOwnedSnafu { addr });

        if !self.guards_intact(index) {
            warn!(addr, index, "Guard band overwritten, keeping block allocated.");
            return CorruptionDetectedSnafu { addr }.fail();
        }

        self.bitmap.clear(index);
        self.free_count += 1;
        debug!(index, free_count = self.free_count, "Reclaimed pool block.");
        Ok(())
    }

    /// Returns whether `ptr` points anywhere into the pool's blocks, allocated or not.
    #[inline]
    pub fn contains(&self, ptr: *const u8) -> bool {
        self.blocks.contains(ptr)
    }

    /// Returns whether `ptr` points into a block that is currently allocated.
    pub fn is_allocated(&self, ptr: *const u8) -> bool {
        self.blocks
            .offset_of(ptr)
            .is_some_and(|offset| self.bitmap.is_set(offset / self.stride()))
    }

    /// Marks every block free. The region itself is left alone, it belongs to the caller.
    pub fn destroy(&mut self) {
        self.bitmap.clear_all();
        self.free_count = self.block_count;
    }

    #[inline(always)]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    #[inline(always)]
    pub fn block_count(&self) -> usize {
        self.block_count
    }

    #[inline(always)]
    pub fn free_count(&self) -> usize {
        self.free_count
    }

    #[inline(always)]
    pub fn has_guard_bands(&self) -> bool {
        self.guard_size != 0
    }

    #[inline(always)]
    pub fn stride(&self) -> usize {
        self.block_size + 2 * self.guard_size
    }

    /// The largest power of two every payload address of this pool is a multiple of.
    pub fn alignment(&self) -> usize {
        alignment_of(self.blocks.addr() + self.guard_size).min(alignment_of(self.stride()))
    }

    /// Addresses spanned by the pool's blocks, guard bands included.
    #[inline]
    pub fn address_range(&self) -> Range<usize> {
        let blocks = self.blocks();
        blocks.addr()..blocks.end_addr()
    }

    /// The run of blocks, guard bands included.
    #[inline(always)]
    pub(crate) fn blocks(&self) -> Region {
        self.blocks
    }

    /// Index of the block whose payload starts exactly at `ptr`.
    fn payload_index(&self, ptr: *const u8) -> Option<usize> {
        let offset = self.blocks.offset_of(ptr)?.checked_sub(self.guard_size)?;
        (offset % self.stride() == 0).then(|| offset / self.stride())
    }

    fn guards_intact(&self, index: usize) -> bool {
        if self.guard_size == 0 {
            return true;
        }
        let block = index * self.stride();
        self.blocks.read::<u32>(block) == GUARD_PATTERN
            && self.blocks.read::<u32>(block + GUARD_SIZE + self.block_size) == GUARD_PATTERN
    }
}
