//! A user-space memory system: a first-fit heap and a bank of fixed-size pools
//! sharing one pre-reserved arena.
//!
//! # Usage
//! Reserve an arena, describe the pools you want and build a [`MemorySystem`] over it.
//! ```
//! use memsys::arena::{Arena, BoxedArena};
//! use memsys::{MemoryConfig, MemorySystem, PoolDescriptor};
//!
//! let arena = BoxedArena::new(64 * 1024).unwrap();
//! let pools = [PoolDescriptor::new(16, 128), PoolDescriptor::new(64, 64)];
//! let config = MemoryConfig::DEFAULT.with_pools(&pools);
//! let mut system = MemorySystem::new(unsafe { arena.region() }, &config).unwrap();
//!
//! let small = system.alloc(12).unwrap();   // served by the 16-byte pool
//! let large = system.alloc(1000).unwrap(); // served by the heap
//! system.free(small.as_ptr()).unwrap();
//! system.free(large.as_ptr()).unwrap();
//! assert!(system.free(large.as_ptr()).is_err());
//! ```
//!
//! [`GlobalMemorySystem`] wraps the same thing behind a lock and reserves its own arena
//! on first use, so it can replace the process's allocator:
//! ```ignore
//! use memsys::{GlobalMemorySystem, MemoryConfig};
//!
//! #[global_allocator]
//! static ALLOCATOR: GlobalMemorySystem = GlobalMemorySystem::new(MemoryConfig::DEFAULT);
//!
//! fn main() {
//!     let v1: Vec<u32> = vec![1, 2, 3];
//!     println!("Pools are cool {:?}", v1);
//! }
//! ```
//!
//! # Mode of operation
//! The arena is reserved once, in full, and never grown. At start-up its front is carved into
//! the fixed-size pools, in the order they are configured, and whatever is left becomes the heap.
//! - An allocation is handed to the first pool whose block size can hold it. If that pool is
//!   exhausted the next size class is tried, and if no pool can serve the request it goes to the heap.
//! - A free asks each pool whether the pointer falls into its blocks and hands it to the owner,
//!   falling back to the heap. Pointers nobody handed out are refused with an error,
//!   never silently accepted.
//!
//! Below are the abstractions the system is built from:
//!
//! ## Pools
//! A [`FixedSizeAllocator`] serves blocks of a single size. Its occupancy is a
//! [`Bitmap`](bitmap::Bitmap) stored in front of the blocks, and allocation always takes the
//! lowest free block. With guard bands enabled each block is framed by two sentinels which are
//! checked on free; a block whose sentinels were overwritten is reported and kept allocated.
//!
//! ## Blocks
//! The heap is divided into blocks, each a header followed by a payload. The header records the
//! payload's size and, for aligned allocations, how many padding bytes in front of it belong to
//! the block. Every block is either free or outstanding.
//!
//! ## Free list
//! Free blocks are chained through their headers in ascending address order. Allocation takes the
//! first block that fits and splits off whatever it doesn't need. When nothing fits, address
//! neighbours are merged ([`collect`](MemorySystem::collect)) and the search runs once more before
//! the request fails. Live allocations never move.
//!
//! ## Outstanding list
//! Allocated blocks are chained the same way, newest first, so that a free can verify that it
//! was given a pointer the heap actually handed out.
//!
//! # Threads
//! [`MemorySystem`] itself is not synchronised; it takes `&mut self` and leaves sharing to
//! its owner. [`GlobalMemorySystem`] is the shared version, all threads take turns on one lock.
//!
//! [`FixedSizeAllocator`]: allocators::FixedSizeAllocator

pub use crate::allocators::{FixedSizeAllocator, HeapAllocator};
pub use crate::config::{MemoryConfig, PoolDescriptor};
pub use crate::error::{MemoryError, Result};
pub use crate::global::GlobalMemorySystem;
pub use crate::region::Region;
pub use crate::system::MemorySystem;

pub mod allocators;
pub mod arena;
pub mod bitmap;
mod blocklist;
pub mod config;
mod error;
mod global;
mod header;
mod region;
mod system;
mod util;
