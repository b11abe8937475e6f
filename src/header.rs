//! Defines the [`BlockHeader`] struct and associated constants.

use core::mem::{align_of, size_of};

use static_assertions::{const_assert, const_assert_eq};

pub const HEADER_SIZE: usize = size_of::<BlockHeader>();
pub const HEADER_ALIGN: usize = align_of::<BlockHeader>();

/// Link value terminating a list.
pub const NIL: usize = usize::MAX;

// Blocks are laid out back to back, so a header must end where the next one may start.
const_assert_eq!(HEADER_SIZE % HEADER_ALIGN, 0);
const_assert_eq!(HEADER_ALIGN, align_of::<usize>());
const_assert!(HEADER_SIZE >= 4 * size_of::<usize>());

/// Stores information about a block of the heap.
///
/// A header sits immediately before the payload it describes, and a header plus its
/// payload is a block. All positions are byte offsets into the heap's region so
/// a header never holds a raw pointer.
///
/// # Adjustment
/// `adjustment` counts the padding bytes in front of the header that belong to the block.
/// They appear when the payload had to be pushed forward to honour an alignment request
/// and are handed back when the block is freed. The block therefore really spans
/// `[raw_start(), end())`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct BlockHeader {
    /// Offset of the payload, always the header's own offset plus [`HEADER_SIZE`].
    pub base: usize,
    /// Payload size in bytes.
    pub size: usize,
    /// Padding reserved in front of the header.
    pub adjustment: usize,
    /// Offset of the next header in whichever list holds this block, or [`NIL`].
    pub next: usize,
}

impl BlockHeader {
    /// Creates an unlinked header for a block whose header starts at offset `at`.
    #[inline(always)]
    pub fn new(at: usize, size: usize, adjustment: usize) -> BlockHeader {
        BlockHeader {
            base: at + HEADER_SIZE,
            size,
            adjustment,
            next: NIL,
        }
    }

    /// Offset of the header itself.
    #[inline(always)]
    pub fn offset(&self) -> usize {
        self.base - HEADER_SIZE
    }

    /// Offset of the first byte owned by the block, padding included.
    #[inline(always)]
    pub fn raw_start(&self) -> usize {
        self.offset() - self.adjustment
    }

    /// Offset one past the last payload byte.
    #[inline(always)]
    pub fn end(&self) -> usize {
        self.base + self.size
    }

    /// Bytes spanned by the block: padding, header and payload.
    #[inline(always)]
    pub fn extent(&self) -> usize {
        self.end() - self.raw_start()
    }

    #[inline(always)]
    pub fn next(&self) -> Option<usize> {
        (self.next != NIL).then_some(self.next)
    }
}
