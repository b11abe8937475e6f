//! The [`MemoryError`] type returned by every fallible operation in this crate.

use snafu::Snafu;

/// Why an allocator operation was refused.
///
/// None of these leave an allocator in an inconsistent state; the operation that
/// produced the error simply had no effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum MemoryError {
    /// A zero-size heap request, a non power-of-two alignment, a null arena,
    /// or a malformed pool configuration.
    #[snafu(display("invalid argument: {reason}"))]
    InvalidArgument { reason: &'static str },

    /// No free block or slot could hold the request, even after coalescing.
    #[snafu(display("out of memory while allocating {size} bytes"))]
    OutOfMemory { size: usize },

    /// The pointer was never handed out, was already freed, or points inside a block.
    #[snafu(display("pointer {addr:#x} is not an outstanding allocation"))]
    NotOwned { addr: usize },

    /// A guard band around the block was overwritten. The block stays allocated.
    #[snafu(display("guard band of block {addr:#x} was overwritten"))]
    CorruptionDetected { addr: usize },

    /// The arena can't hold the requested pools or the heap's first block.
    #[snafu(display("arena of {available} bytes cannot hold {required} bytes"))]
    ArenaTooSmall { required: usize, available: usize },
}

pub type Result<T, E = MemoryError> = core::result::Result<T, E>;
