//! A variable-size, first-fit heap allocator over a single fixed arena.
//!
// # Implementation notes
// ## Blocks and lists
// The arena is tiled with blocks, each a `BlockHeader` followed by its payload (see
// `crate::header`). Every block is on exactly one of two intrusive lists threaded
// through the headers:
// - the free list, kept in strictly ascending address order, so that two free blocks
//   can only be neighbours in memory if they are neighbours in the list;
// - the outstanding list, unordered, new allocations pushed to the front.
//
// ## Object requirements
// Requested sizes are rounded up to `HEADER_ALIGN` and payloads are aligned to at least
// `HEADER_ALIGN`, which keeps the raw start of every block header-aligned.
//
// ## Padding
// Placing an aligned payload may leave a gap between the raw start of the chosen free
// block and the allocation's header. A gap that can hold a block of its own becomes a free
// block; a smaller one is kept as the allocation's `adjustment` and folded back into the
// block when it is freed. Free blocks therefore never carry an adjustment once they are
// on the free list, but the search still accounts for one.

use core::fmt;
use core::ops::Range;
use core::ptr::NonNull;

use snafu::{ensure, OptionExt};
use tracing::{debug, instrument, Level};

use self::util::{augment_align, augment_size, find_place, Placement};
use crate::blocklist::BlockList;
use crate::error::{
    ArenaTooSmallSnafu, InvalidArgumentSnafu, NotOwnedSnafu, OutOfMemorySnafu, Result,
};
use crate::header::{BlockHeader, HEADER_ALIGN, HEADER_SIZE};
use crate::region::Region;
use crate::util::{align_down, align_up};

mod util;

/// Smallest payload a split-off free block may have.
pub(crate) const MIN_PAYLOAD: usize = HEADER_ALIGN;

/// Smallest block worth putting on the free list.
pub(crate) const BLOCK_MIN_SIZE: usize = HEADER_SIZE + MIN_PAYLOAD;

/// Alignment used when the caller has no requirement of its own.
pub const DEFAULT_ALIGN: usize = HEADER_ALIGN;

/// A first-fit heap allocator with address-ordered coalescing.
///
/// The allocator's own bookkeeping (the two list heads) lives in this value;
/// the arena holds nothing but blocks.
pub struct HeapAllocator {
    region: Region,
    capacity: usize,
    free: BlockList,
    outstanding: BlockList,
}

impl fmt::Debug for HeapAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeapAllocator")
            .field("region", &self.region)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

/// A snapshot of one block, as reported by [`HeapAllocator::free_blocks`]
/// and [`HeapAllocator::outstanding_blocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Address of the block's header.
    pub header: usize,
    /// Address of the block's payload.
    pub base: usize,
    /// Payload size in bytes.
    pub size: usize,
    /// Padding in front of the header owned by the block.
    pub adjustment: usize,
}

impl BlockInfo {
    /// Address of the first byte owned by the block.
    #[inline]
    pub fn raw_start(&self) -> usize {
        self.header - self.adjustment
    }

    /// Address one past the last payload byte.
    #[inline]
    pub fn end(&self) -> usize {
        self.base + self.size
    }
}

impl HeapAllocator {
    /// Creates a heap spanning `region`. Everything from the first header-aligned byte
    /// onwards becomes one free block.
    #[instrument(level = "info", err(Debug, level = Level::ERROR))]
    pub fn new(region: Region) -> Result<Self> {
        let start = align_up(region.addr(), HEADER_ALIGN).context(ArenaTooSmallSnafu {
            required: BLOCK_MIN_SIZE,
            available: region.len(),
        })? - region.addr();
        let capacity = align_down(region.len().saturating_sub(start), HEADER_ALIGN);
        ensure!(
            capacity >= BLOCK_MIN_SIZE,
            ArenaTooSmallSnafu {
                required: start + BLOCK_MIN_SIZE,
                available: region.len(),
            }
        );

        let mut heap = HeapAllocator {
            region,
            capacity,
            free: BlockList::new(),
            outstanding: BlockList::new(),
        };
        region.write(start, BlockHeader::new(start, capacity - HEADER_SIZE, 0));
        heap.free.push_front(region, start);

        debug!(start, capacity, "Heap initialised.");
        Ok(heap)
    }

    /// Allocates `size` bytes aligned to `align` (0 meaning no requirement).
    ///
    /// The free list is searched first-fit. If nothing fits, adjacent free blocks are
    /// coalesced and the search is retried once before giving up with
    /// [`OutOfMemory`](crate::MemoryError::OutOfMemory).
    #[instrument(level = "info", ret(level = Level::INFO), err(Debug, level = Level::DEBUG))]
    pub fn alloc(&mut self, size: usize, align: usize) -> Result<NonNull<u8>> {
        ensure!(size != 0, InvalidArgumentSnafu { reason: "zero-size allocation" });
        let obj_align = augment_align(align)?;
        let obj_size = augment_size(size).context(OutOfMemorySnafu { size })?;
        debug!(obj_size, obj_align, "Request augmented.");

        let (prev, block, placement) = match self.find_free_block(obj_size, obj_align) {
            Some(found) => found,
            None => {
                debug!("No free block fits, coalescing and retrying.");
                self.collect();
                self.find_free_block(obj_size, obj_align)
                    .context(OutOfMemorySnafu { size })?
            }
        };

        let header = self.carve(prev, block, placement);
        self.outstanding.push_front(self.region, header);
        Ok(self.region.ptr_at(header + HEADER_SIZE))
    }

    /// Returns the allocation whose payload starts at `ptr` to the free list.
    ///
    /// Anything that is not the payload address of an outstanding allocation is refused
    /// with [`NotOwned`](crate::MemoryError::NotOwned) and changes nothing.
    #[instrument(level = "info", err(Debug, level = Level::DEBUG))]
    pub fn free(&mut self, ptr: *const u8) -> Result<()> {
        let region = self.region;
        let addr = ptr as usize;
        let base = region.offset_of(ptr).context(NotOwnedSnafu { addr })?;
        let (prev, block) = self
            .outstanding
            .find(region, |_, header| header.base == base)
            .context(NotOwnedSnafu { addr })?;
        self.outstanding.unlink(region, prev, block);

        let header: BlockHeader = region.read(block);
        let raw_start = header.raw_start();
        region.write(
            raw_start,
            BlockHeader::new(raw_start, header.extent() - HEADER_SIZE, 0),
        );
        self.free.insert_sorted(region, raw_start);

        debug!(
            raw_start,
            reclaimed = header.adjustment,
            "Block returned to the free list."
        );
        Ok(())
    }

    /// Merges every run of address-adjacent free blocks into one block.
    /// Returns how many merges were made. Outstanding allocations never move.
    #[instrument(level = "debug", ret(level = Level::DEBUG))]
    pub fn collect(&mut self) -> usize {
        let region = self.region;
        let mut merges = 0;

        loop {
            let mut merged = false;
            let mut current = self.free.head();

            while let Some(offset) = current {
                let mut header: BlockHeader = region.read(offset);
                let Some(next) = header.next() else {
                    break;
                };
                let next_header: BlockHeader = region.read(next);

                if header.end() != next_header.raw_start() {
                    current = Some(next);
                    continue;
                }

                header.size += next_header.extent();
                header.next = next_header.next;
                region.write(offset, header);
                merged = true;
                merges += 1;
                debug!(
                    offset,
                    absorbed = next,
                    size = header.size,
                    "Merged adjacent free blocks."
                );
            }

            if !merged {
                break;
            }
        }

        merges
    }

    /// Returns whether `ptr` points into the heap's arena, allocated or not.
    #[inline]
    pub fn contains(&self, ptr: *const u8) -> bool {
        self.region.contains(ptr)
    }

    /// Returns whether `ptr` is the payload address of an outstanding allocation.
    pub fn is_allocated(&self, ptr: *const u8) -> bool {
        self.region.offset_of(ptr).is_some_and(|base| {
            self.outstanding
                .find(self.region, |_, header| header.base == base)
                .is_some()
        })
    }

    /// Payload size of the largest free block, 0 if there is none.
    pub fn largest_free_block_size(&self) -> usize {
        self.free
            .iter(self.region)
            .map(|(_, header)| header.size)
            .max()
            .unwrap_or(0)
    }

    /// Bytes spanned by all free blocks, headers and padding included.
    pub fn total_free_size(&self) -> usize {
        self.free
            .iter(self.region)
            .map(|(_, header)| header.extent())
            .sum()
    }

    /// Bytes spanned by all outstanding allocations, headers and padding included.
    pub fn total_outstanding_size(&self) -> usize {
        self.outstanding
            .iter(self.region)
            .map(|(_, header)| header.extent())
            .sum()
    }

    /// Bytes the heap manages: the free and outstanding totals always add up to this.
    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Addresses spanned by the heap's arena.
    #[inline]
    pub fn address_range(&self) -> Range<usize> {
        let region = self.region();
        region.addr()..region.end_addr()
    }

    #[inline(always)]
    pub(crate) fn region(&self) -> Region {
        self.region
    }

    /// Free blocks in ascending address order.
    pub fn free_blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ {
        self.free
            .iter(self.region)
            .map(|(_, header)| self.block_info(&header))
    }

    /// Outstanding allocations, most recent first.
    pub fn outstanding_blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ {
        self.outstanding
            .iter(self.region)
            .map(|(_, header)| self.block_info(&header))
    }

    /// Renders both lists for debugging.
    pub fn dump(&self) -> HeapDump<'_> {
        HeapDump { heap: self }
    }

    /// Drops every block from both lists. The arena is left alone, it belongs to the caller,
    /// and the heap can't hand out memory afterwards.
    #[instrument(level = "info")]
    pub fn destroy(&mut self) {
        self.free.clear();
        self.outstanding.clear();
    }

    /// Walks the free list and returns the first block that can host the object,
    /// its predecessor and where the object would go.
    #[instrument(level = "debug", ret(level = Level::DEBUG))]
    fn find_free_block(
        &self,
        obj_size: usize,
        obj_align: usize,
    ) -> Option<(Option<usize>, usize, Placement)> {
        let mut prev = None;
        for (offset, header) in self.free.iter(self.region) {
            let placement = find_place(
                self.region.addr(),
                header.raw_start(),
                header.end(),
                obj_size,
                obj_align,
            );
            if let Some(placement) = placement {
                return Some((prev, offset, placement));
            }
            prev = Some(offset);
        }
        None
    }

    /// Takes the free block at `block` off the free list and turns the part described
    /// by `placement` into an allocation. Space left in front of or behind the allocation
    /// goes back on the free list at the block's old position if it can hold a block,
    /// otherwise the allocation absorbs it. Returns the allocation's header offset.
    #[instrument(level = "debug")]
    fn carve(&mut self, prev: Option<usize>, block: usize, placement: Placement) -> usize {
        let region = self.region;
        let free_header: BlockHeader = region.read(block);
        let raw_start = free_header.raw_start();
        let raw_end = free_header.end();
        self.free.unlink(region, prev, block);

        let mut end = placement.end;
        if raw_end - end >= BLOCK_MIN_SIZE {
            region.write(end, BlockHeader::new(end, raw_end - end - HEADER_SIZE, 0));
            self.free.insert_after(region, prev, end);
            debug!(offset = end, "Split off trailing free block.");
        } else {
            end = raw_end;
        }

        let mut adjustment = placement.adjustment;
        if adjustment >= BLOCK_MIN_SIZE {
            region.write(
                raw_start,
                BlockHeader::new(raw_start, adjustment - HEADER_SIZE, 0),
            );
            self.free.insert_after(region, prev, raw_start);
            adjustment = 0;
            debug!(offset = raw_start, "Split off leading free block.");
        }

        let header = placement.header;
        region.write(
            header,
            BlockHeader::new(header, end - placement.payload(), adjustment),
        );
        debug!(header, adjustment, size = end - placement.payload(), "Placed allocation.");
        header
    }

    fn block_info(&self, header: &BlockHeader) -> BlockInfo {
        let addr = self.region.addr();
        BlockInfo {
            header: addr + header.offset(),
            base: addr + header.base,
            size: header.size,
            adjustment: header.adjustment,
        }
    }
}

/// Human readable listing of a heap's free and outstanding blocks.
pub struct HeapDump<'a> {
    heap: &'a HeapAllocator,
}

impl fmt::Display for HeapDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Free blocks:")?;
        if self.heap.free.is_empty() {
            writeln!(f, "  none")?;
        }
        for block in self.heap.free_blocks() {
            writeln!(f, "  {}", DumpLine(&block))?;
        }
        writeln!(f, "Outstanding allocations:")?;
        if self.heap.outstanding.is_empty() {
            writeln!(f, "  none")?;
        }
        for block in self.heap.outstanding_blocks() {
            writeln!(f, "  {}", DumpLine(&block))?;
        }
        Ok(())
    }
}

struct DumpLine<'a>(&'a BlockInfo);

impl fmt::Display for DumpLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "header {:#x}, base {:#x}, size {} bytes",
            self.0.header, self.0.base, self.0.size
        )?;
        if self.0.adjustment != 0 {
            write!(f, ", slack {} bytes", self.0.adjustment)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
