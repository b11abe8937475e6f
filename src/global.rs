//! A process-wide, lock-serialized [`MemorySystem`].

use core::alloc::{GlobalAlloc, Layout};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{error, warn};

use crate::arena::{Arena, MmapArena};
use crate::config::MemoryConfig;
use crate::error::Result;
use crate::system::MemorySystem;
use crate::util::raw_ptr;

/// A [`MemorySystem`] behind a `Mutex`, built over its own [`MmapArena`] on first use.
///
/// This is the shape the system takes when it stands in for a process's allocator:
/// it can be created in `const` context, so it can be a `static` and the
/// `#[global_allocator]`, and every entry point takes the lock, so any number of
/// threads can share it.
///
/// Initialisation is lazy and reserves the whole arena in one go. If it fails,
/// every allocation returns null and the next one tries again.
///
/// When used as the global allocator, don't install a `tracing` subscriber that
/// allocates: its events would re-enter the allocator while the lock is held.
pub struct GlobalMemorySystem {
    config: MemoryConfig<'static>,
    state: Mutex<Option<State>>,
}

struct State {
    // Dropped before the arena it lives in.
    system: MemorySystem,
    _arena: MmapArena,
}

impl GlobalMemorySystem {
    pub const fn new(config: MemoryConfig<'static>) -> Self {
        GlobalMemorySystem {
            config,
            state: Mutex::new(None),
        }
    }

    /// Allocates `size` bytes, returning null on failure.
    pub fn allocate(&self, size: usize) -> *mut u8 {
        let ptr = self.with_system(|system| system.alloc(size).ok());
        raw_ptr(ptr.ok().flatten())
    }

    /// Returns memory obtained from [`allocate`](Self::allocate) or the `GlobalAlloc` impl.
    /// Pointers the system doesn't recognise are refused and leave it untouched.
    pub fn release(&self, ptr: *mut u8) -> Result<()> {
        self.with_system(|system| system.free(ptr))?
    }

    /// Coalesces the heap's free blocks, returning the number of merges.
    pub fn collect(&self) -> Result<usize> {
        self.with_system(MemorySystem::collect)
    }

    /// Runs `f` on the system, building it first if this is the first use.
    pub fn with_system<R>(&self, f: impl FnOnce(&mut MemorySystem) -> R) -> Result<R> {
        let mut guard = self.lock();
        let state = match guard.as_mut() {
            Some(state) => state,
            None => guard.insert(self.init().inspect_err(|e| {
                error!(error = ?e, "Could not initialise the memory system.");
            })?),
        };
        Ok(f(&mut state.system))
    }

    /// Whether the arena has been reserved yet.
    pub fn is_initialized(&self) -> bool {
        self.lock().is_some()
    }

    /// Tears the system down and returns its arena to the operating system.
    /// A later allocation builds a fresh system.
    ///
    /// # Safety
    /// No pointer handed out before the call may be used or released after it.
    pub unsafe fn shutdown(&self) {
        let state = self.lock().take();
        if let Some(State { system, _arena }) = state {
            system.destroy();
        }
    }

    fn init(&self) -> Result<State> {
        let arena = MmapArena::reserve(self.config.arena_size)?;
        let system = MemorySystem::new(unsafe { arena.region() }, &self.config)?;
        Ok(State {
            system,
            _arena: arena,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Option<State>> {
        // A panic in `with_system` can only come from the caller's closure,
        // between two complete system operations.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for GlobalMemorySystem {
    fn default() -> Self {
        Self::new(MemoryConfig::DEFAULT)
    }
}

//---------------impl GlobalAlloc for GlobalMemorySystem---------------//

unsafe impl GlobalAlloc for GlobalMemorySystem {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = self.with_system(|system| {
            system.alloc_aligned(layout.size(), layout.align()).ok()
        });
        raw_ptr(ptr.ok().flatten())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if let Err(e) = self.release(ptr) {
            warn!(error = ?e, size = layout.size(), "Dropped an invalid deallocation.");
        }
    }
}
