use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use self::format::with_logging;

use super::*;
use crate::arena::{Arena, BoxedArena, MmapArena};
use crate::MemoryError;


fn with_heap<R>(size: usize, f: impl FnOnce(&mut HeapAllocator) -> R) -> R {
    let arena = BoxedArena::new(size).unwrap();
    let mut heap = HeapAllocator::new(unsafe { arena.region() }).unwrap();
    f(&mut heap)
}

/// Same as `with_heap` but over a page-aligned arena, for tests that depend on absolute addresses.
fn with_mapped_heap<R>(size: usize, f: impl FnOnce(&mut HeapAllocator) -> R) -> R {
    let arena = MmapArena::reserve(size).unwrap();
    let mut heap = HeapAllocator::new(unsafe { arena.region() }).unwrap();
    f(&mut heap)
}

fn assert_consistent(heap: &HeapAllocator) {
    let free: Vec<BlockInfo> = heap.free_blocks().collect();
    for pair in free.windows(2) {
        assert!(
            pair[0].end() <= pair[1].raw_start(),
            "Free list should be address ordered: {pair:?}"
        );
    }
    assert!(free.iter().all(|block| block.adjustment == 0));
    assert_eq!(
        heap.total_free_size() + heap.total_outstanding_size(),
        heap.capacity(),
        "Free and outstanding blocks should tile the heap."
    );
}

fn assert_coalesced(heap: &HeapAllocator) {
    let free: Vec<BlockInfo> = heap.free_blocks().collect();
    for pair in free.windows(2) {
        assert!(
            pair[0].end() < pair[1].raw_start(),
            "Adjacent free blocks should have been merged: {pair:?}"
        );
    }
}

#[test]
fn test_1() {
    with_heap(4096, |heap| {
        assert_eq!(heap.capacity(), 4096);
        let blocks: Vec<BlockInfo> = heap.free_blocks().collect();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].header, heap.region().addr());
        assert_eq!(blocks[0].base, blocks[0].header + HEADER_SIZE);
        assert_eq!(blocks[0].size, 4096 - HEADER_SIZE);
        assert_eq!(heap.total_free_size(), 4096);
        assert_eq!(heap.total_outstanding_size(), 0);
        assert_eq!(heap.largest_free_block_size(), 4096 - HEADER_SIZE);
    });
}

#[test]
fn test_2() {
    with_heap(4096, |heap| {
        let p1 = heap.alloc(64, 0).unwrap().as_ptr();
        let p2 = heap.alloc(64, 0).unwrap().as_ptr();
        let p3 = heap.alloc(1, 1).unwrap().as_ptr();
        assert_eq!(p1 as usize, heap.region().addr() + HEADER_SIZE);
        assert_eq!(p2 as usize, p1 as usize + 64 + HEADER_SIZE);
        assert_eq!(p3 as usize, p2 as usize + 64 + HEADER_SIZE);

        // Most recent allocation first.
        let outstanding: Vec<usize> = heap.outstanding_blocks().map(|b| b.base).collect();
        assert_eq!(outstanding, [p3 as usize, p2 as usize, p1 as usize]);
        assert_eq!(heap.outstanding_blocks().next().unwrap().size, HEADER_ALIGN);
        assert_consistent(heap);
    });
}

#[test]
fn test_3() {
    with_heap(4096, |heap| {
        assert!(matches!(
            heap.alloc(0, 8),
            Err(MemoryError::InvalidArgument { .. })
        ));
        assert!(matches!(
            heap.alloc(8, 3),
            Err(MemoryError::InvalidArgument { .. })
        ));
        assert!(matches!(
            heap.alloc(usize::MAX, 0),
            Err(MemoryError::OutOfMemory { .. })
        ));
        assert_eq!(heap.total_free_size(), 4096);
        assert_eq!(heap.free_blocks().count(), 1);
    });
}

#[test]
fn test_4() {
    with_heap(4096, |heap| {
        let ptrs: Vec<*mut u8> = (0..6).map(|_| heap.alloc(48, 0).unwrap().as_ptr()).collect();
        for i in [3, 0, 5, 1] {
            heap.free(ptrs[i]).unwrap();
            assert_consistent(heap);
        }
        // Four freed blocks plus what was left behind the last allocation, none merged yet.
        assert_eq!(heap.free_blocks().count(), 5);
        let bases: Vec<usize> = heap.free_blocks().map(|b| b.base).take(4).collect();
        assert_eq!(bases, [0, 1, 3, 5].map(|i| ptrs[i] as usize));

        heap.free(ptrs[2]).unwrap();
        heap.free(ptrs[4]).unwrap();
        assert_consistent(heap);
        assert_eq!(heap.collect(), 6);
        assert_eq!(heap.free_blocks().count(), 1);
        assert_eq!(heap.largest_free_block_size(), heap.capacity() - HEADER_SIZE);
    });
}

#[test]
fn test_5() {
    with_heap(4096, |heap| {
        let p = heap.alloc(32, 0).unwrap().as_ptr();
        let totals = (heap.total_free_size(), heap.total_outstanding_size());
        let local = 0_u64;

        for bogus in [
            unsafe { p.add(8) },
            heap.region().base().as_ptr(),
            &local as *const u64 as *mut u8,
            core::ptr::null_mut(),
        ] {
            assert_eq!(
                heap.free(bogus),
                Err(MemoryError::NotOwned {
                    addr: bogus as usize
                })
            );
        }
        assert_eq!(totals, (heap.total_free_size(), heap.total_outstanding_size()));

        heap.free(p).unwrap();
        assert!(matches!(heap.free(p), Err(MemoryError::NotOwned { .. })));
        assert_consistent(heap);
    });
}

#[test]
fn test_6() {
    // Alloc immediately followed by free leaves the aggregate statistics untouched.
    with_heap(16 * 1024, |heap| {
        let a = heap.alloc(100, 0).unwrap().as_ptr();
        let _b = heap.alloc(200, 0).unwrap();
        heap.free(a).unwrap();

        for (size, align) in [(1, 0), (24, 8), (100, 64), (300, 256), (8, 4096)] {
            let before = (heap.total_free_size(), heap.total_outstanding_size());
            let p = heap.alloc(size, align).unwrap();
            assert_ne!(before.1, heap.total_outstanding_size());
            heap.free(p.as_ptr()).unwrap();
            assert_eq!(
                before,
                (heap.total_free_size(), heap.total_outstanding_size())
            );
        }
    });
}

#[test]
fn test_7() {
    // A request no single free block can hold triggers a collect and succeeds.
    with_heap(1024, |heap| {
        let size = 1024 / 4 - HEADER_SIZE;
        let ptrs: Vec<*mut u8> = (0..4).map(|_| heap.alloc(size, 0).unwrap().as_ptr()).collect();
        assert_eq!(heap.total_free_size(), 0);
        assert_eq!(heap.alloc(8, 0), Err(MemoryError::OutOfMemory { size: 8 }));

        for p in &ptrs {
            heap.free(*p).unwrap();
        }
        assert_eq!(heap.free_blocks().count(), 4);
        assert_eq!(heap.largest_free_block_size(), size);

        let big = heap.alloc(2 * size, 0).unwrap().as_ptr();
        assert_eq!(big, ptrs[0]);
        assert_coalesced(heap);
        assert_consistent(heap);
    });
}

#[test]
fn test_8() {
    with_heap(4096, |heap| {
        assert!(matches!(
            heap.alloc(4096 - HEADER_SIZE + 1, 0),
            Err(MemoryError::OutOfMemory { .. })
        ));
        assert_eq!(heap.total_free_size(), 4096);

        let p = heap.alloc(4096 - HEADER_SIZE, 0).unwrap().as_ptr();
        assert_eq!(heap.total_free_size(), 0);
        assert_eq!(heap.largest_free_block_size(), 0);
        heap.free(p).unwrap();
        assert_eq!(heap.largest_free_block_size(), 4096 - HEADER_SIZE);
    });
}

#[test]
fn test_9() {
    with_heap(64 * 1024, |heap| {
        let mut live: Vec<(usize, usize)> = vec![];
        for j in 0..=12 {
            let align = 1 << j;
            for size in [1, 7, 24, 100] {
                let p = heap.alloc(size, align).unwrap().as_ptr() as usize;
                assert_eq!(p % align, 0, "{size} bytes should be {align}-aligned.");
                live.push((p, size));
                assert_consistent(heap);
            }
        }

        live.sort_unstable();
        for pair in live.windows(2) {
            assert!(pair[0].0 + pair[0].1 <= pair[1].0 - HEADER_SIZE);
        }

        for (p, _) in live {
            heap.free(p as *const u8).unwrap();
        }
        heap.collect();
        assert_eq!(heap.free_blocks().count(), 1);
        assert_eq!(heap.total_free_size(), heap.capacity());
    });
}

#[test]
fn test_10() {
    // Padding that can hold a block of its own goes back on the free list.
    with_mapped_heap(8192, |heap| {
        let first = heap.alloc(8, 0).unwrap().as_ptr() as usize;
        let p = heap.alloc(8, 1024).unwrap().as_ptr() as usize;
        assert_eq!(p % 1024, 0);

        let allocation = heap.outstanding_blocks().next().unwrap();
        assert_eq!(allocation.adjustment, 0);

        let padding = heap.free_blocks().next().unwrap();
        assert_eq!(padding.raw_start(), first + 8);
        assert_eq!(padding.end(), allocation.header);
        assert_consistent(heap);

        // The padding block is reused by the next request that fits in it.
        let q = heap.alloc(64, 0).unwrap().as_ptr() as usize;
        assert_eq!(q, padding.base);
    });
}

#[test]
fn test_11() {
    // Padding too small for a block of its own stays with the allocation as slack,
    // comes back on free, and is reused as-is when the same alignment is asked for again.
    const ALIGN: usize = 64;
    with_mapped_heap(8192, |heap| {
        let filler_size = (2 * ALIGN - HEADER_ALIGN - 2 * HEADER_SIZE) % ALIGN;
        let filler = heap.alloc(filler_size, 0).unwrap().as_ptr() as usize;

        let p = heap.alloc(16, ALIGN).unwrap().as_ptr();
        assert_eq!(p as usize % ALIGN, 0);
        let allocation = heap.outstanding_blocks().next().unwrap();
        assert_eq!(allocation.adjustment, HEADER_ALIGN);
        assert_eq!(allocation.raw_start(), filler + filler_size);
        assert_consistent(heap);

        heap.free(p).unwrap();
        let reclaimed = heap.free_blocks().next().unwrap();
        assert_eq!(reclaimed.header, allocation.raw_start());
        assert_eq!(reclaimed.adjustment, 0);
        assert_eq!(reclaimed.size, HEADER_ALIGN + 16);
        assert_consistent(heap);

        let q = heap.alloc(16, ALIGN).unwrap().as_ptr();
        assert_eq!(q, p);
        assert_eq!(
            heap.outstanding_blocks().next().unwrap().adjustment,
            HEADER_ALIGN
        );
        assert_consistent(heap);
    });
}

#[test]
fn test_12() {
    with_heap(32 * 1024, |heap| {
        let mut rng = StdRng::seed_from_u64(0x5EED);
        let mut live: Vec<*mut u8> = vec![];

        for _ in 0..2000 {
            if live.is_empty() || rng.gen_bool(0.6) {
                let size = rng.gen_range(1..=512);
                let align = 1 << rng.gen_range(0..8);
                match heap.alloc(size, align) {
                    Ok(p) => {
                        assert_eq!(p.as_ptr() as usize % align, 0);
                        live.push(p.as_ptr());
                    }
                    Err(MemoryError::OutOfMemory { .. }) => {}
                    Err(e) => panic!("Unexpected failure: {e}"),
                }
            } else {
                let i = rng.gen_range(0..live.len());
                heap.free(live.swap_remove(i)).unwrap();
            }
            assert_consistent(heap);

            if rng.gen_ratio(1, 16) {
                heap.collect();
                assert_coalesced(heap);
            }
        }

        live.shuffle(&mut rng);
        for p in live {
            heap.free(p).unwrap();
        }
        heap.collect();
        assert_eq!(heap.free_blocks().count(), 1);
        assert_eq!(heap.total_outstanding_size(), 0);
        assert_eq!(heap.largest_free_block_size(), heap.capacity() - HEADER_SIZE);
    });
}

#[test]
fn test_13() {
    with_heap(1024, |heap| {
        let p = heap.alloc(16, 0).unwrap().as_ptr();
        let region = heap.region();
        assert!(heap.contains(p));
        assert!(heap.contains(region.base().as_ptr()));
        assert!(!heap.contains(region.ptr_at(region.len()).as_ptr()));
        assert!(heap.is_allocated(p));
        assert!(!heap.is_allocated(unsafe { p.add(8) }));
        heap.free(p).unwrap();
        assert!(!heap.is_allocated(p));
        assert!(heap.contains(p));
    });
}

#[test]
fn test_14() {
    with_heap(1024, |heap| {
        let _p = heap.alloc(16, 0).unwrap();
        heap.destroy();
        assert_eq!(heap.free_blocks().count(), 0);
        assert_eq!(heap.outstanding_blocks().count(), 0);
        assert!(matches!(
            heap.alloc(16, 0),
            Err(MemoryError::OutOfMemory { .. })
        ));
    });
}

#[test]
fn test_15() {
    with_heap(1024, |heap| {
        let p = heap.alloc(40, 0).unwrap().as_ptr();
        let dump = heap.dump().to_string();
        let mut lines = dump.lines();
        assert_eq!(lines.next(), Some("Free blocks:"));
        assert!(lines.next().unwrap().contains(&format!(
            "size {} bytes",
            1024 - 2 * HEADER_SIZE - 40
        )));
        assert_eq!(lines.next(), Some("Outstanding allocations:"));
        assert!(lines
            .next()
            .unwrap()
            .contains(&format!("base {:#x}, size 40 bytes", p as usize)));
        assert_eq!(lines.next(), None);
    });
}

#[test]
fn test_16() {
    let arena = BoxedArena::new(64).unwrap();
    assert!(matches!(
        HeapAllocator::new(unsafe { arena.region() }.subregion(0, BLOCK_MIN_SIZE - 1)),
        Err(MemoryError::ArenaTooSmall { .. })
    ));

    // A misaligned region starts its first block at the next header-aligned byte.
    let region = unsafe { arena.region() }.subregion(3, 61);
    let heap = HeapAllocator::new(region).unwrap();
    let first = heap.free_blocks().next().unwrap();
    assert_eq!(first.header % HEADER_ALIGN, 0);
    assert_eq!(first.header, region.addr() + (HEADER_ALIGN - 3 % HEADER_ALIGN));
    assert_eq!(heap.capacity() % HEADER_ALIGN, 0);
}

#[test]
fn test_logged_session() {
    with_logging(|| {
        with_heap(2048, |heap| {
            let a = heap.alloc(100, 16).unwrap().as_ptr();
            let b = heap.alloc(200, 0).unwrap().as_ptr();
            heap.free(a).unwrap();
            heap.free(b).unwrap();
            assert!(heap.free(b).is_err());
            assert!(heap.collect() > 0);
            assert_consistent(heap);
        })
    });
}

#[test]
fn test_17() {
    with_heap(256, |heap| {
        let p = heap.alloc(256 - HEADER_SIZE, 0).unwrap().as_ptr();
        assert!(heap.dump().to_string().starts_with("Free blocks:\n  none\n"));
        heap.free(p).unwrap();
        assert!(heap
            .dump()
            .to_string()
            .ends_with("Outstanding allocations:\n  none\n"));
    });
}

#[test]
fn test_18() {
    with_heap(1024, |heap| {
        let range = heap.address_range();
        assert_eq!(range.len(), 1024);
        assert_eq!(range.start, heap.region().addr());
        let p = heap.alloc(16, 0).unwrap().as_ptr() as usize;
        assert!(range.contains(&p));
        assert!(!range.contains(&range.end));
    });
}
