//! Parameters a [`MemorySystem`](crate::MemorySystem) is built from.

/// Most fixed-size pools a single system can carry.
pub const MAX_POOLS: usize = 16;

/// Shape of one fixed-size pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolDescriptor {
    pub block_size: usize,
    pub block_count: usize,
}

impl PoolDescriptor {
    #[inline]
    pub const fn new(block_size: usize, block_count: usize) -> Self {
        PoolDescriptor {
            block_size,
            block_count,
        }
    }
}

const DEFAULT_POOLS: [PoolDescriptor; 5] = [
    PoolDescriptor::new(16, 100),
    PoolDescriptor::new(32, 100),
    PoolDescriptor::new(96, 100),
    PoolDescriptor::new(256, 100),
    PoolDescriptor::new(1024, 100),
];

/// Everything needed to lay out a memory system.
///
/// Pools are listed smallest block size first; requests are routed to the first pool
/// whose blocks are big enough. Whatever the pools leave of the arena goes to the heap.
///
/// All constructors are `const` so that a configuration can live in a `static`:
/// ```
/// use memsys::{MemoryConfig, PoolDescriptor};
///
/// static POOLS: [PoolDescriptor; 2] = [PoolDescriptor::new(16, 64), PoolDescriptor::new(64, 32)];
/// static CONFIG: MemoryConfig<'static> = MemoryConfig::DEFAULT
///     .with_arena_size(64 * 1024)
///     .with_pools(&POOLS)
///     .with_guard_bands(false);
///
/// assert_eq!(CONFIG.pools.len(), 2);
/// assert_eq!(CONFIG.descriptor_hint, MemoryConfig::DEFAULT.descriptor_hint);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryConfig<'a> {
    /// Bytes to reserve for the arena when the system reserves its own.
    pub arena_size: usize,
    pub pools: &'a [PoolDescriptor],
    /// Whether pool blocks are framed by guard bands.
    pub guard_bands: bool,
    /// Capacity hint for a future allocation descriptor table. Recorded, never required.
    pub descriptor_hint: usize,
}

impl MemoryConfig<'static> {
    /// 1 MiB arena with 100-block pools of 16, 32, 96, 256 and 1024 bytes, guard bands on.
    ///
    /// A guard band is [`GUARD_SIZE`](crate::allocators::fixed_size::GUARD_SIZE) bytes, so
    /// with guard bands on pool payloads are only that far aligned and
    /// [`alloc_aligned`](crate::MemorySystem::alloc_aligned) sends anything asking for more,
    /// which includes most `Layout`s a global allocator sees, to the heap. Turn guard bands
    /// off to have the pools serve word-aligned requests.
    pub const DEFAULT: MemoryConfig<'static> = MemoryConfig {
        arena_size: 1024 * 1024,
        pools: &DEFAULT_POOLS,
        guard_bands: true,
        descriptor_hint: 2048,
    };
}

impl<'a> MemoryConfig<'a> {
    #[inline]
    pub const fn with_arena_size(self, arena_size: usize) -> Self {
        MemoryConfig { arena_size, ..self }
    }

    #[inline]
    pub const fn with_pools<'b>(self, pools: &'b [PoolDescriptor]) -> MemoryConfig<'b> {
        MemoryConfig {
            arena_size: self.arena_size,
            pools,
            guard_bands: self.guard_bands,
            descriptor_hint: self.descriptor_hint,
        }
    }

    #[inline]
    pub const fn with_guard_bands(self, guard_bands: bool) -> Self {
        MemoryConfig {
            guard_bands,
            ..self
        }
    }

    #[inline]
    pub const fn with_descriptor_hint(self, descriptor_hint: usize) -> Self {
        MemoryConfig {
            descriptor_hint,
            ..self
        }
    }
}

impl Default for MemoryConfig<'static> {
    fn default() -> Self {
        Self::DEFAULT
    }
}
