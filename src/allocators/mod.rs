//! The [`FixedSizeAllocator`] and [`HeapAllocator`] sub-allocators.

pub mod fixed_size;
pub mod heap;

pub use fixed_size::FixedSizeAllocator;
pub use heap::HeapAllocator;
