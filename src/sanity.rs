//! The sanity predicate: a pure, read-only check that every manager
//! invariant holds. It reads the manager's own live list directly --
//! there is no separate shadow map to cross-check against, the region
//! list *is* the ground truth.
use crate::address::{Address, PAGE_SIZE};
use crate::descriptor::DescriptorPool;
use crate::region_list::RegionList;

/// Checks every manager invariant: frontier ordering, page alignment,
/// frontier/list-head coherence, and region-list ordering and gap
/// separation. Returns `Err` with a short diagnostic on the first
/// violation found.
pub(crate) fn check(
    base: Address,
    start: Address,
    brk: Address,
    map: Address,
    end: Address,
    list: &RegionList,
    pool: &DescriptorPool,
) -> Result<(), &'static str> {
    if !(base.0 <= start.0 && start.0 <= brk.0 && brk.0 <= map.0 && map.0 <= end.0) {
        return Err("frontiers out of order: base <= start <= brk <= map <= end must hold");
    }

    for (name, addr) in [("start", start), ("brk", brk), ("map", map), ("end", end)] {
        if !addr.is_page_aligned() {
            return Err(page_align_message(name));
        }
    }

    match list.head {
        Some(head) => {
            if pool.get(head).addr != map {
                return Err("map must equal the region list head's address");
            }
        }
        None => {
            if map != end {
                return Err("map must equal end when the region list is empty");
            }
        }
    }

    let mut cursor = list.head;
    let mut previous_end: Option<Address> = None;
    let mut count = 0usize;

    while let Some(index) = cursor {
        count += 1;
        if count > pool.capacity() {
            return Err("region list longer than descriptor pool capacity: likely a cycle");
        }

        let region = pool.get(index);

        if region.size == 0 {
            return Err("a live region must have non-zero size");
        }
        if !region.addr.is_page_aligned() || region.size % PAGE_SIZE != 0 {
            return Err("a live region's address and size must be page-aligned");
        }

        let region_end = region
            .addr
            .checked_add(region.size)
            .ok_or("a live region's extent overflows")?;
        if region_end.0 > end.0 {
            return Err("a live region extends past end");
        }
        if region.addr.0 < start.0 {
            return Err("a live region starts before start");
        }

        if let Some(prev_end) = previous_end {
            if region.addr.0 <= prev_end.0 {
                return Err("adjacent regions are not strictly gap-separated");
            }
        }

        previous_end = Some(region_end);
        cursor = region.next;
    }

    if pool.in_use_count() > pool.capacity() {
        return Err("more descriptors in use than the pool has capacity for");
    }

    Ok(())
}

fn page_align_message(name: &'static str) -> &'static str {
    match name {
        "start" => "start must be page-aligned",
        "brk" => "brk must be page-aligned",
        "map" => "map must be page-aligned",
        "end" => "end must be page-aligned",
        _ => "address must be page-aligned",
    }
}
