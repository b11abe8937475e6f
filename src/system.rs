//! The [`MemorySystem`] facade routing requests between fixed-size pools and a heap.

use core::ptr::NonNull;

use arrayvec::ArrayVec;
use snafu::{ensure, OptionExt};
use tracing::{debug, instrument, Level};

use crate::allocators::heap::DEFAULT_ALIGN;
use crate::allocators::{FixedSizeAllocator, HeapAllocator};
use crate::config::{MemoryConfig, MAX_POOLS};
use crate::error::{ArenaTooSmallSnafu, InvalidArgumentSnafu, Result};
use crate::region::Region;

/// One arena split into a run of fixed-size pools followed by a heap.
///
/// Small requests go to the first pool whose block size covers them, everything else,
/// and anything the pools can't serve, goes to the heap. Frees are routed by asking
/// each pool whether it owns the pointer, so callers never need to remember where an
/// allocation came from.
///
/// ```text
/// | pool 0 | pool 1 | ... | pool n | heap ................................. |
/// ```
#[derive(Debug)]
pub struct MemorySystem {
    region: Region,
    pools: ArrayVec<FixedSizeAllocator, MAX_POOLS>,
    heap: HeapAllocator,
    descriptor_hint: usize,
}

impl MemorySystem {
    /// Lays out the pools described by `config` at the front of `region` and hands the
    /// rest to the heap.
    ///
    /// Fails with [`InvalidArgument`](crate::MemoryError::InvalidArgument) for a malformed
    /// pool list and with [`ArenaTooSmall`](crate::MemoryError::ArenaTooSmall) if the
    /// pools, or the heap's first block, don't fit.
    #[instrument(level = "info", skip(config), err(Debug, level = Level::ERROR))]
    pub fn new(region: Region, config: &MemoryConfig<'_>) -> Result<Self> {
        ensure!(
            config.pools.len() <= MAX_POOLS,
            InvalidArgumentSnafu { reason: "too many pools" }
        );
        ensure!(
            config
                .pools
                .windows(2)
                .all(|w| w[0].block_size <= w[1].block_size),
            InvalidArgumentSnafu {
                reason: "pool block sizes are not in ascending order"
            }
        );

        let mut pools = ArrayVec::new();
        let mut rest = region;
        for pool in config.pools {
            let footprint =
                FixedSizeAllocator::footprint(pool.block_size, pool.block_count, config.guard_bands)
                    .context(InvalidArgumentSnafu {
                        reason: "pool does not fit in the address space",
                    })?;
            ensure!(
                footprint <= rest.len(),
                ArenaTooSmallSnafu {
                    required: footprint,
                    available: rest.len(),
                }
            );
            let (front, back) = rest.split_at(footprint);
            pools.push(FixedSizeAllocator::new(
                front,
                pool.block_size,
                pool.block_count,
                config.guard_bands,
            )?);
            rest = back;
        }

        let heap = HeapAllocator::new(rest)?;
        debug!(
            pools = pools.len(),
            heap_capacity = heap.capacity(),
            "Memory system ready."
        );
        Ok(MemorySystem {
            region,
            pools,
            heap,
            descriptor_hint: config.descriptor_hint,
        })
    }

    /// Allocates `size` bytes from the first pool that can hold them, or from the heap
    /// with word alignment.
    pub fn alloc(&mut self, size: usize) -> Result<NonNull<u8>> {
        ensure!(size != 0, InvalidArgumentSnafu { reason: "zero-size allocation" });
        self.alloc_from_pools(size, 1)
            .map_or_else(|| self.heap.alloc(size, DEFAULT_ALIGN), Ok)
    }

    /// Like [`alloc`](Self::alloc) but the returned address is a multiple of `align`.
    /// Pools whose blocks aren't aligned well enough are skipped, see
    /// [`FixedSizeAllocator::alignment`].
    pub fn alloc_aligned(&mut self, size: usize, align: usize) -> Result<NonNull<u8>> {
        ensure!(size != 0, InvalidArgumentSnafu { reason: "zero-size allocation" });
        let align = align.max(1);
        ensure!(
            align.is_power_of_two(),
            InvalidArgumentSnafu {
                reason: "alignment is not a power of two"
            }
        );
        self.alloc_from_pools(size, align)
            .map_or_else(|| self.heap.alloc(size, align), Ok)
    }

    /// Returns `ptr` to whichever pool owns it, or to the heap if none does.
    pub fn free(&mut self, ptr: *const u8) -> Result<()> {
        match self.pools.iter_mut().find(|pool| pool.contains(ptr)) {
            Some(pool) => pool.free(ptr),
            None => self.heap.free(ptr),
        }
    }

    /// Coalesces the heap's free blocks. Pools never fragment and are left alone.
    #[inline]
    pub fn collect(&mut self) -> usize {
        self.heap.collect()
    }

    /// Returns whether `ptr` points anywhere into the arena.
    #[inline]
    pub fn contains(&self, ptr: *const u8) -> bool {
        self.region.contains(ptr)
    }

    /// Returns whether `ptr` is live memory handed out by a pool or the heap.
    pub fn is_allocated(&self, ptr: *const u8) -> bool {
        match self.pools.iter().find(|pool| pool.contains(ptr)) {
            Some(pool) => pool.is_allocated(ptr),
            None => self.heap.is_allocated(ptr),
        }
    }

    #[inline(always)]
    pub fn pools(&self) -> &[FixedSizeAllocator] {
        &self.pools
    }

    #[inline(always)]
    pub fn heap(&self) -> &HeapAllocator {
        &self.heap
    }

    #[inline(always)]
    pub fn descriptor_hint(&self) -> usize {
        self.descriptor_hint
    }

    /// Tears the system down and gives the arena window back to its owner.
    /// Every pointer handed out by the system is invalid afterwards.
    #[instrument(level = "info")]
    pub fn destroy(mut self) -> Region {
        for pool in &mut self.pools {
            pool.destroy();
        }
        self.heap.destroy();
        self.region
    }

    fn alloc_from_pools(&mut self, size: usize, align: usize) -> Option<NonNull<u8>> {
        let ptr = self
            .pools
            .iter_mut()
            .filter(|pool| pool.block_size() >= size && pool.alignment() >= align)
            .find_map(|pool| pool.alloc().ok());
        if ptr.is_none() {
            debug!(size, align, "No pool can serve the request, falling back to the heap.");
        }
        ptr
    }
}
