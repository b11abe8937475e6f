//! Defines the [`BlockList`] struct, the intrusive list threading through block headers.

use crate::header::{BlockHeader, NIL};
use crate::region::Region;

/// A singly linked list of blocks whose links live in the blocks' own headers.
///
/// The list only remembers its head; every operation is handed the region
/// the headers live in. Nodes are identified by their header offset.
#[derive(Debug)]
pub struct BlockList {
    head: usize,
}

impl BlockList {
    /// Creates an empty list.
    #[inline]
    pub const fn new() -> Self {
        BlockList { head: NIL }
    }

    /// Returns the head of the list or `None` if the list is empty.
    #[inline]
    pub fn head(&self) -> Option<usize> {
        (self.head != NIL).then_some(self.head)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head == NIL
    }

    /// Forgets every node. The headers themselves are left untouched.
    #[inline]
    pub fn clear(&mut self) {
        self.head = NIL;
    }

    /// Links the block at `node` in right after `prev`, or at the front if `prev` is `None`.
    /// This operation has a time complexity of *O*(1).
    ///
    /// `node` must hold a valid header that is not part of any list, and `prev` must
    /// be part of this one.
    pub fn insert_after(&mut self, region: Region, prev: Option<usize>, node: usize) {
        let mut header: BlockHeader = region.read(node);
        match prev {
            None => {
                header.next = self.head;
                self.head = node;
            }
            Some(prev) => {
                let mut prev_header: BlockHeader = region.read(prev);
                header.next = prev_header.next;
                prev_header.next = node;
                region.write(prev, prev_header);
            }
        }
        region.write(node, header);
    }

    /// Adds the block at `node` to the front of the list.
    #[inline]
    pub fn push_front(&mut self, region: Region, node: usize) {
        self.insert_after(region, None, node);
    }

    /// Inserts the block at `node` before the first node with a greater offset,
    /// which keeps a list that was sorted by address sorted.
    /// This operation has a time complexity of *O*(n).
    pub fn insert_sorted(&mut self, region: Region, node: usize) {
        let mut prev = None;
        for (offset, _) in self.iter(region) {
            if offset > node {
                break;
            }
            prev = Some(offset);
        }
        self.insert_after(region, prev, node);
    }

    /// Removes `node` from the list. `prev` must be its predecessor, or `None` if it is the head.
    /// This operation has a time complexity of *O*(1).
    pub fn unlink(&mut self, region: Region, prev: Option<usize>, node: usize) {
        let next = region.read::<BlockHeader>(node).next;
        match prev {
            None => {
                debug_assert_eq!(self.head, node, "Only the head has no predecessor.");
                self.head = next;
            }
            Some(prev) => {
                let mut prev_header: BlockHeader = region.read(prev);
                debug_assert_eq!(prev_header.next, node, "`prev` should precede `node`.");
                prev_header.next = next;
                region.write(prev, prev_header);
            }
        }
    }

    /// Returns the first node for which `pred` holds, together with its predecessor.
    pub fn find(
        &self,
        region: Region,
        mut pred: impl FnMut(usize, &BlockHeader) -> bool,
    ) -> Option<(Option<usize>, usize)> {
        let mut prev = None;
        for (offset, header) in self.iter(region) {
            if pred(offset, &header) {
                return Some((prev, offset));
            }
            prev = Some(offset);
        }
        None
    }

    /// Walks the list from the head, yielding each node's offset and header.
    pub fn iter(&self, region: Region) -> Iter {
        Iter {
            region,
            next: self.head,
        }
    }
}

/// Iterator over the nodes of a [`BlockList`].
pub struct Iter {
    region: Region,
    next: usize,
}

impl Iterator for Iter {
    type Item = (usize, BlockHeader);

    fn next(&mut self) -> Option<Self::Item> {
        if self.next == NIL {
            return None;
        }
        let offset = self.next;
        let header: BlockHeader = self.region.read(offset);
        self.next = header.next;
        Some((offset, header))
    }
}
