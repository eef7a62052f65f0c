//! The region list: a doubly-linked, strictly address-ordered,
//! gap-separated list of live descriptors. This module owns only list
//! topology (link/unlink/gap-search); the policy that decides *when*
//! to coalesce, split, grow or shrink lives in `manager.rs`, matching
//! the spec's own split between "region list" (~20% of the reference
//! implementation) and "layout arithmetic & policy" (~70%).
use crate::address::Address;
use crate::descriptor::{Descriptor, DescriptorIndex, DescriptorPool};

/// The outcome of a gap search: either a spot was found, with the
/// region (if any) that would sit to its left and right, or there was
/// no interior gap large enough.
pub(crate) enum Gap {
    Found {
        start: Address,
        left: Option<DescriptorIndex>,
        right: Option<DescriptorIndex>,
    },
    NotFound,
}

#[derive(Default)]
pub(crate) struct RegionList {
    pub head: Option<DescriptorIndex>,
}

impl RegionList {
    /// The address the `map` frontier must sit at given this list:
    /// the head region's address if non-empty, else `end`.
    pub fn frontier(&self, pool: &DescriptorPool, end: Address) -> Address {
        match self.head {
            Some(index) => pool.get(index).addr,
            None => end,
        }
    }

    /// First-fit search over the interior gaps of the list, including
    /// the gap between the last region and `end`. Does *not* consider
    /// the top-gap fallback between `brk` and the current `map`
    /// frontier -- that's `manager.rs`'s job once this returns
    /// `NotFound`.
    pub fn find_gap(&self, pool: &DescriptorPool, length: usize, end: Address) -> Gap {
        let mut cursor = self.head;

        while let Some(index) = cursor {
            let region = pool.get(index);
            let gap_start = region
                .addr
                .checked_add(region.size)
                .expect("region extents never overflow");
            let right_bound = match region.next {
                Some(next) => pool.get(next).addr,
                None => end,
            };

            if right_bound.distance_from(gap_start) >= length {
                return Gap::Found {
                    start: gap_start,
                    left: Some(index),
                    right: region.next,
                };
            }

            cursor = region.next;
        }

        Gap::NotFound
    }

    /// Unlinks `index` from the list, patching its neighbors' links
    /// and the head pointer. Does not touch the pool's free list.
    pub fn unlink(&mut self, pool: &mut DescriptorPool, index: DescriptorIndex) {
        let (prev, next) = {
            let d = pool.get(index);
            (d.prev, d.next)
        };

        match prev {
            Some(p) => pool.get_mut(p).next = next,
            None => self.head = next,
        }

        if let Some(n) = next {
            pool.get_mut(n).prev = prev;
        }
    }

    /// Links a fresh descriptor for `fields` in between `left` and
    /// `right` (either may be absent), returning its index.
    pub fn insert_between(
        &mut self,
        pool: &mut DescriptorPool,
        left: Option<DescriptorIndex>,
        right: Option<DescriptorIndex>,
        fields: Descriptor,
    ) -> Option<DescriptorIndex> {
        let index = pool.allocate(Descriptor {
            prev: left,
            next: right,
            ..fields
        })?;

        match left {
            Some(l) => pool.get_mut(l).next = Some(index),
            None => self.head = Some(index),
        }
        if let Some(r) = right {
            pool.get_mut(r).prev = Some(index);
        }

        Some(index)
    }
}
