//! Utility functions specific to the [`HeapAllocator`](super::HeapAllocator).

use snafu::ensure;

use crate::error::{InvalidArgumentSnafu, Result};
use crate::header::{HEADER_ALIGN, HEADER_SIZE};
use crate::util::align_up;

/// Rounds a requested size up to a multiple of [`HEADER_ALIGN`] so that whatever follows
/// the payload can start with a header, or returns `None` if the size can't be augmented.
#[inline]
pub fn augment_size(size: usize) -> Option<usize> {
    // Size of objects should not exceed isize::MAX.
    // https://doc.rust-lang.org/std/ptr/index.html#allocated-object
    match align_up(size, HEADER_ALIGN) {
        Some(new_size) if new_size as isize > 0 => Some(new_size),
        _ => None,
    }
}

/// Turns a requested alignment into the one payloads are actually placed at.
/// Zero means "don't care"; anything below [`HEADER_ALIGN`] is raised to it.
#[inline]
pub fn augment_align(align: usize) -> Result<usize> {
    let align = align.max(1);
    ensure!(
        align.is_power_of_two(),
        InvalidArgumentSnafu {
            reason: "alignment is not a power of two"
        }
    );
    Ok(align.max(HEADER_ALIGN))
}

/// Where an allocation lands inside a free block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    /// Offset of the allocation's header.
    pub header: usize,
    /// Bytes between the free block's raw start and the header.
    pub adjustment: usize,
    /// Offset one past the last payload byte.
    pub end: usize,
}

impl Placement {
    #[inline(always)]
    pub fn payload(&self) -> usize {
        self.header + HEADER_SIZE
    }
}

/// Returns the placement of an object of `obj_size` bytes aligned to `obj_align` inside the
/// block spanning `[raw_start, raw_end)` of a region whose first byte is at `region_addr`,
/// or `None` if it doesn't fit.
///
/// Alignment is worked out on absolute addresses from the raw start, so padding a block
/// already carries is reused instead of being stacked on.
pub fn find_place(
    region_addr: usize,
    raw_start: usize,
    raw_end: usize,
    obj_size: usize,
    obj_align: usize,
) -> Option<Placement> {
    let lowest_payload = region_addr.checked_add(raw_start)?.checked_add(HEADER_SIZE)?;
    let payload = align_up(lowest_payload, obj_align)? - region_addr;
    let end = payload.checked_add(obj_size)?;
    (end <= raw_end).then(|| Placement {
        header: payload - HEADER_SIZE,
        adjustment: payload - HEADER_SIZE - raw_start,
        end,
    })
}
