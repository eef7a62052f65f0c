//! The manager itself: frontiers, the region list, the descriptor
//! pool, and the five public operations that mutate them. Public entry
//! points take the single mutex and delegate to `*_locked` helpers;
//! `remap`'s grow-by-move case calls `map_locked`/`unmap_locked`
//! directly while the lock is already held, rather than requiring a
//! recursive mutex.
#[cfg(any(
    all(test, feature = "check_contracts_in_tests"),
    feature = "check_contracts"
))]
use contracts::*;
#[cfg(not(any(
    all(test, feature = "check_contracts_in_tests"),
    feature = "check_contracts"
)))]
use disabled_contracts::*;

use std::ptr::NonNull;
use std::sync::Mutex;

use crate::address::{round_up_to_page, Address, PAGE_SIZE};
use crate::coverage::Coverage;
use crate::descriptor::{Descriptor, DescriptorIndex, DescriptorPool};
use crate::error::{Error, Result};
use crate::flags::{is_valid_map_flags, is_valid_map_prot, MapFlags, Prot, RemapFlags};
use crate::region_list::{Gap, RegionList};
use crate::sanity;

/// A fixed non-zero pattern released bytes are overwritten with when
/// `scrub` is enabled, so a use-after-free reads garbage rather than
/// zero or stale data.
const SCRUB_PATTERN: u8 = 0xDD;

/// Cheap liveness sentinel, checked whenever `debug_assertions` are on.
const MAGIC: u64 = 0x564D_4D41_4E21_4F4B;

/// Configuration accepted by `Manager::init`. This is the manager's
/// only configuration surface: there is no config file or environment,
/// just these two switches plus the byte range itself.
#[derive(Clone, Copy, Debug, Default)]
pub struct ManagerConfig {
    /// When true, released bytes are overwritten with a fixed pattern
    /// before their descriptor is recycled.
    pub scrub: bool,
    /// When true, every public operation runs the full sanity
    /// predicate on entry and exit.
    pub sanity: bool,
}

/// A read-only snapshot of the manager's occupancy, for introspection,
/// alongside `is_sane`/`set_sanity`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Stats {
    pub region_count: usize,
    pub bytes_mapped: usize,
    pub bytes_free: usize,
    pub descriptors_in_use: usize,
    pub descriptors_capacity: usize,
}

struct ManagerState {
    magic: u64,
    memory: NonNull<u8>,
    base: Address,
    end: Address,
    start: Address,
    brk: Address,
    map: Address,
    list: RegionList,
    pool: DescriptorPool,
    scrub: bool,
    sanity: bool,
    coverage: Coverage,
}

// `ManagerState` owns a raw pointer into caller-provided memory, but
// never shares it outside the lock that guards every access.
unsafe impl Send for ManagerState {}

/// The virtual memory manager. Owns no OS resources: it partitions a
/// byte range the caller already reserved and keeps managing it until
/// dropped.
pub struct Manager {
    inner: Mutex<ManagerState>,
}

impl ManagerState {
    fn ptr_for(&self, addr: Address) -> *mut u8 {
        unsafe { self.memory.as_ptr().add(addr.distance_from(self.base)) }
    }

    fn zero_range(&self, addr: Address, len: usize) {
        if len == 0 {
            return;
        }
        unsafe { std::ptr::write_bytes(self.ptr_for(addr), 0, len) };
    }

    fn scrub_range(&self, addr: Address, len: usize) {
        if !self.scrub || len == 0 {
            return;
        }
        unsafe { std::ptr::write_bytes(self.ptr_for(addr), SCRUB_PATTERN, len) };
    }

    fn copy_range(&self, from: Address, to: Address, len: usize) {
        if len == 0 {
            return;
        }
        unsafe { std::ptr::copy_nonoverlapping(self.ptr_for(from), self.ptr_for(to), len) };
    }

    fn resync_map(&mut self) {
        self.map = self.list.frontier(&self.pool, self.end);
    }

    fn check_sanity(&self) -> std::result::Result<(), &'static str> {
        sanity::check(
            self.base,
            self.start,
            self.brk,
            self.map,
            self.end,
            &self.list,
            &self.pool,
        )
    }

    fn assert_sanity_if_enabled(&self, when: &'static str) -> Result<()> {
        if self.sanity {
            if let Err(message) = self.check_sanity() {
                log::warn!("sanity check failed {}: {}", when, message);
                return Err(Error::unexpected(message));
            }
        }
        Ok(())
    }

    fn find_containing(&self, addr: Address, length: usize) -> Option<DescriptorIndex> {
        let mut cursor = self.list.head;
        while let Some(index) = cursor {
            let region = self.pool.get(index);
            let region_end = region.addr.checked_add(region.size)?;
            if addr.0 >= region.addr.0 && addr.checked_add(length)?.0 <= region_end.0 {
                return Some(index);
            }
            cursor = region.next;
        }
        None
    }

    /// The unlocked core of `map`: first-fit gap search, coalescing
    /// with an abutting neighbor, and the top-gap fallback.
    fn map_locked(
        &mut self,
        hint: Option<Address>,
        length: usize,
        prot: Prot,
        flags: MapFlags,
    ) -> Result<Address> {
        if hint.is_some() {
            return Err(Error::invalid_parameter("map does not support address hints"));
        }
        if length == 0 {
            return Err(Error::invalid_parameter("map length must be non-zero"));
        }
        if !is_valid_map_prot(prot) {
            return Err(Error::invalid_parameter(
                "map requires read+write protection and rejects exec",
            ));
        }
        if !is_valid_map_flags(flags) {
            return Err(Error::invalid_parameter(
                "map requires anonymous+private flags and rejects shared/fixed",
            ));
        }

        let rounded_length =
            round_up_to_page(length).ok_or_else(|| Error::invalid_parameter("map length overflows"))?;

        let (start, left, right) = match self.list.find_gap(&self.pool, rounded_length, self.end) {
            Gap::Found { start, left, right } => {
                self.coverage.map_interior_fit = true;
                (start, left, right)
            }
            Gap::NotFound => {
                self.coverage.map_top_gap = true;
                let start = self
                    .map
                    .checked_sub(rounded_length)
                    .ok_or_else(|| Error::out_of_memory("requested length exceeds address space"))?;
                if self.brk.0 > start.0 {
                    return Err(Error::out_of_memory("no gap large enough for this mapping"));
                }
                (start, None, self.list.head)
            }
        };

        let left_abuts = left.map_or(false, |l| {
            self.pool.get(l).addr.checked_add(self.pool.get(l).size) == Some(start)
        });
        let right_abuts = right.map_or(false, |r| start.checked_add(rounded_length) == Some(self.pool.get(r).addr));

        if left_abuts {
            let left_index = left.expect("left_abuts implies left is Some");
            self.pool.get_mut(left_index).size += rounded_length;

            if right_abuts {
                let right_index = right.expect("right_abuts implies right is Some");
                let right_size = self.pool.get(right_index).size;
                self.pool.get_mut(left_index).size += right_size;
                self.list.unlink(&mut self.pool, right_index);
                self.pool.release(right_index);
                self.coverage.map_coalesce_both = true;
            } else {
                self.coverage.map_grow_left = true;
            }
        } else if right_abuts {
            let right_index = right.expect("right_abuts implies right is Some");
            let r = self.pool.get_mut(right_index);
            r.addr = start;
            r.size += rounded_length;
            self.coverage.map_extend_right = true;
        } else {
            self.list
                .insert_between(
                    &mut self.pool,
                    left,
                    right,
                    Descriptor {
                        addr: start,
                        size: rounded_length,
                        prot,
                        flags,
                        prev: None,
                        next: None,
                    },
                )
                .ok_or_else(|| Error::failure("descriptor pool exhausted"))?;
            self.coverage.map_fresh = true;
        }

        self.resync_map();
        self.zero_range(start, rounded_length);
        Ok(start)
    }

    /// The unlocked core of `unmap`: the full/prefix/suffix/middle
    /// cases of releasing a range from within a single live region.
    fn unmap_locked(&mut self, addr: Address, length: usize) -> Result<()> {
        if length == 0 || length % PAGE_SIZE != 0 {
            return Err(Error::invalid_parameter(
                "unmap length must be a non-zero page multiple",
            ));
        }
        if !addr.is_page_aligned() {
            return Err(Error::invalid_parameter("unmap address must be page-aligned"));
        }

        let index = self
            .find_containing(addr, length)
            .ok_or_else(|| Error::invalid_parameter("unmap range is not a single live region"))?;

        let (region_addr, region_size, region_next) = {
            let r = self.pool.get(index);
            (r.addr, r.size, r.next)
        };
        let region_end = region_addr
            .checked_add(region_size)
            .expect("live region extents never overflow");
        let range_end = addr
            .checked_add(length)
            .expect("already validated against a live region's extent");

        let is_start = addr == region_addr;
        let is_end = range_end == region_end;

        if is_start && is_end {
            self.scrub_range(addr, length);
            self.list.unlink(&mut self.pool, index);
            self.pool.release(index);
            self.coverage.unmap_full = true;
        } else if is_start {
            self.scrub_range(addr, length);
            let r = self.pool.get_mut(index);
            r.addr = range_end;
            r.size -= length;
            self.coverage.unmap_prefix = true;
        } else if is_end {
            self.scrub_range(addr, length);
            self.pool.get_mut(index).size -= length;
            self.coverage.unmap_suffix = true;
        } else {
            let right_addr = range_end;
            let right_size = region_end.distance_from(range_end);

            self.list
                .insert_between(
                    &mut self.pool,
                    Some(index),
                    region_next,
                    Descriptor {
                        addr: right_addr,
                        size: right_size,
                        prot: self.pool.get(index).prot,
                        flags: self.pool.get(index).flags,
                        prev: None,
                        next: None,
                    },
                )
                .ok_or_else(|| Error::failure("descriptor pool exhausted for middle split"))?;

            self.scrub_range(addr, length);
            self.pool.get_mut(index).size = addr.distance_from(region_addr);
            self.coverage.unmap_middle = true;
        }

        self.resync_map();
        Ok(())
    }

    /// The unlocked core of `remap`: no-op, shrink, grow-in-place, and
    /// grow-by-move.
    fn remap_locked(
        &mut self,
        addr: Address,
        old_size: usize,
        new_size: usize,
        flags: RemapFlags,
    ) -> Result<Address> {
        if old_size == 0 || new_size == 0 {
            return Err(Error::invalid_parameter("remap sizes must be non-zero"));
        }
        if flags != RemapFlags::MAY_MOVE {
            return Err(Error::invalid_parameter("remap requires exactly MayMove"));
        }

        let old_rounded = round_up_to_page(old_size)
            .ok_or_else(|| Error::invalid_parameter("remap old_size overflows"))?;
        let new_rounded = round_up_to_page(new_size)
            .ok_or_else(|| Error::invalid_parameter("remap new_size overflows"))?;

        let index = self
            .find_containing(addr, old_rounded)
            .ok_or_else(|| Error::invalid_parameter("remap range is not a single live region"))?;

        if new_rounded == old_rounded {
            self.coverage.remap_noop = true;
            return Ok(addr);
        }

        if new_rounded < old_rounded {
            let shrink_by = old_rounded - new_rounded;
            let excise_addr = addr
                .checked_add(new_rounded)
                .expect("already validated against a live region's extent");
            self.unmap_locked(excise_addr, shrink_by)?;
            self.coverage.remap_shrink = true;
            return Ok(addr);
        }

        let delta = new_rounded - old_rounded;
        let (region_addr, region_size, region_next) = {
            let r = self.pool.get(index);
            (r.addr, r.size, r.next)
        };
        let region_end = region_addr
            .checked_add(region_size)
            .expect("live region extents never overflow");
        let at_tail = addr.checked_add(old_rounded) == Some(region_end);

        if at_tail {
            let right_bound = match region_next {
                Some(next) => self.pool.get(next).addr,
                None => self.end,
            };

            if right_bound.distance_from(region_end) >= delta {
                let new_tail = region_end.checked_add(delta).expect("checked against right_bound");

                self.pool.get_mut(index).size += delta;
                self.zero_range(region_end, delta);

                if let Some(next) = region_next {
                    if new_tail == self.pool.get(next).addr {
                        let next_size = self.pool.get(next).size;
                        self.pool.get_mut(index).size += next_size;
                        self.list.unlink(&mut self.pool, next);
                        self.pool.release(next);
                        self.coverage.remap_grow_in_place_coalesce = true;
                    } else {
                        self.coverage.remap_grow_in_place = true;
                    }
                } else {
                    self.coverage.remap_grow_in_place = true;
                }

                self.resync_map();
                return Ok(addr);
            }
        }

        let prot = self.pool.get(index).prot;
        let region_flags = self.pool.get(index).flags;
        let new_addr = self.map_locked(None, new_rounded, prot, region_flags)?;
        self.copy_range(addr, new_addr, old_rounded);
        self.unmap_locked(addr, old_rounded)?;
        self.coverage.remap_grow_move = true;
        Ok(new_addr)
    }
}

impl Manager {
    /// Initializes a manager over `length` bytes of memory starting at
    /// `base`.
    ///
    /// # Safety
    ///
    /// `base` must point to `length` bytes of memory that are valid
    /// for reads and writes for the lifetime of the returned
    /// `Manager`, and that no other code accesses concurrently: the
    /// manager assumes exclusive ownership of the range and never
    /// calls back into the host to obtain or release memory; its
    /// range is fixed at initialization.
    pub unsafe fn init(base: NonNull<u8>, length: usize, config: ManagerConfig) -> Result<Manager> {
        let base_addr = Address::new(base.as_ptr() as usize);

        if !base_addr.is_page_aligned() {
            return Err(Error::invalid_parameter("base must be page-aligned"));
        }
        if length == 0 || length % PAGE_SIZE != 0 {
            return Err(Error::invalid_parameter(
                "length must be a non-zero page multiple",
            ));
        }

        let end = base_addr
            .checked_add(length)
            .ok_or_else(|| Error::invalid_parameter("base + length overflows the address space"))?;

        let page_count = length / PAGE_SIZE;
        let descriptor_bytes = page_count
            .checked_mul(std::mem::size_of::<Descriptor>())
            .ok_or_else(|| Error::invalid_parameter("managed range is too large for its own descriptor pool"))?;
        let pool_bytes = round_up_to_page(descriptor_bytes)
            .ok_or_else(|| Error::invalid_parameter("descriptor pool size overflows"))?;
        let start = base_addr
            .checked_add(pool_bytes)
            .ok_or_else(|| Error::invalid_parameter("descriptor pool does not fit in the managed range"))?;

        if start.0 > end.0 {
            return Err(Error::invalid_parameter(
                "managed range is too small to hold its own descriptor pool",
            ));
        }

        let state = ManagerState {
            magic: MAGIC,
            memory: base,
            base: base_addr,
            end,
            start,
            brk: start,
            map: end,
            list: RegionList::default(),
            pool: DescriptorPool::new(page_count),
            scrub: config.scrub,
            sanity: config.sanity,
            coverage: Coverage::default(),
        };

        if let Err(message) = state.check_sanity() {
            log::warn!("init produced an inconsistent manager: {}", message);
            return Err(Error::unexpected(message));
        }

        log::trace!(
            "init base={} end={} start={} page_count={}",
            state.base,
            state.end,
            state.start,
            page_count
        );

        Ok(Manager {
            inner: Mutex::new(state),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManagerState> {
        let guard = self.inner.lock().unwrap_or_else(|poison| poison.into_inner());
        debug_assert_eq!(guard.magic, MAGIC, "manager state corrupted or use-after-free");
        guard
    }

    /// Returns the current `brk` and advances it by `increment` bytes.
    /// `increment == 0` queries without mutating anything.
    #[ensures(ret.is_ok() -> self.is_sane(), "sanity holds after a successful sbrk")]
    pub fn sbrk(&self, increment: i64) -> Result<Address> {
        log::trace!("sbrk increment={}", increment);
        let mut state = self.lock();
        state.assert_sanity_if_enabled("on entry to sbrk")?;

        let old_brk = state.brk;
        if increment == 0 {
            return Ok(old_brk);
        }

        let new_brk = old_brk.0 as i128 + increment as i128;
        if new_brk < state.start.0 as i128 || new_brk > state.map.0 as i128 {
            log::warn!("sbrk increment={} would cross a frontier", increment);
            return Err(Error::out_of_memory("sbrk increment would cross a frontier"));
        }

        state.brk = Address::new(new_brk as usize);
        state.assert_sanity_if_enabled("on exit from sbrk")?;
        Ok(old_brk)
    }

    /// Sets `brk` to `addr` unconditionally.
    #[ensures(ret.is_ok() -> self.is_sane(), "sanity holds after a successful brk")]
    pub fn brk(&self, addr: Address) -> Result<()> {
        log::trace!("brk addr={}", addr);
        let mut state = self.lock();
        state.assert_sanity_if_enabled("on entry to brk")?;

        if addr.0 < state.start.0 || addr.0 >= state.map.0 {
            log::warn!("brk addr={} outside [start, map)", addr);
            return Err(Error::invalid_parameter("brk address must be in [start, map)"));
        }

        state.brk = addr;
        state.assert_sanity_if_enabled("on exit from brk")?;
        Ok(())
    }

    /// Allocates a fresh region of at least `length` bytes.
    #[ensures(ret.is_ok() -> self.is_sane(), "sanity holds after a successful map")]
    pub fn map(&self, hint: Option<Address>, length: usize, prot: Prot, flags: MapFlags) -> Result<Address> {
        log::trace!("map length={} prot={:?} flags={:?}", length, prot, flags);
        let mut state = self.lock();
        state.assert_sanity_if_enabled("on entry to map")?;

        let result = state.map_locked(hint, length, prot, flags);
        if let Err(e) = &result {
            log::warn!("map failed: {}", e);
        }
        let result = result?;

        state.assert_sanity_if_enabled("on exit from map")?;
        Ok(result)
    }

    /// Releases `length` bytes starting at `addr`.
    #[ensures(ret.is_ok() -> self.is_sane(), "sanity holds after a successful unmap")]
    pub fn unmap(&self, addr: Address, length: usize) -> Result<()> {
        log::trace!("unmap addr={} length={}", addr, length);
        let mut state = self.lock();
        state.assert_sanity_if_enabled("on entry to unmap")?;

        let result = state.unmap_locked(addr, length);
        if let Err(e) = &result {
            log::warn!("unmap failed: {}", e);
        }
        result?;

        state.assert_sanity_if_enabled("on exit from unmap")?;
        Ok(())
    }

    /// Resizes the region covering `[addr, addr + old_size)` to
    /// `new_size` bytes, possibly moving it.
    #[ensures(ret.is_ok() -> self.is_sane(), "sanity holds after a successful remap")]
    pub fn remap(&self, addr: Address, old_size: usize, new_size: usize, flags: RemapFlags) -> Result<Address> {
        log::trace!(
            "remap addr={} old_size={} new_size={}",
            addr,
            old_size,
            new_size
        );
        let mut state = self.lock();
        state.assert_sanity_if_enabled("on entry to remap")?;

        let result = state.remap_locked(addr, old_size, new_size, flags);
        if let Err(e) = &result {
            log::warn!("remap failed: {}", e);
        }
        let result = result?;

        state.assert_sanity_if_enabled("on exit from remap")?;
        Ok(result)
    }

    /// Runs the sanity predicate and returns whether every manager
    /// invariant currently holds.
    pub fn is_sane(&self) -> bool {
        self.lock().check_sanity().is_ok()
    }

    /// Enables or disables automatic sanity checking on every public
    /// operation's entry and exit.
    pub fn set_sanity(&self, enabled: bool) {
        self.lock().sanity = enabled;
    }

    /// Returns a snapshot of region/descriptor occupancy.
    pub fn stats(&self) -> Stats {
        let state = self.lock();

        let mut region_count = 0;
        let mut bytes_mapped = 0;
        let mut cursor = state.list.head;
        while let Some(index) = cursor {
            let region = state.pool.get(index);
            region_count += 1;
            bytes_mapped += region.size;
            cursor = region.next;
        }

        Stats {
            region_count,
            bytes_mapped,
            bytes_free: state.map.distance_from(state.brk),
            descriptors_in_use: state.pool.in_use_count(),
            descriptors_capacity: state.pool.capacity(),
        }
    }

    /// Branch-coverage snapshot; test-only instrumentation.
    #[cfg(test)]
    pub(crate) fn coverage(&self) -> Coverage {
        self.lock().coverage
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::collection::vec;
    use proptest::prelude::*;
    use std::alloc::{alloc_zeroed, dealloc, Layout};

    /// Owns a page-aligned buffer for the lifetime of a test, freeing it
    /// on drop so Miri/ASan runs stay clean even though we never invoke
    /// the toolchain here.
    struct Arena {
        ptr: NonNull<u8>,
        layout: Layout,
    }

    /// Installs `env_logger` so `RUST_LOG=trace` surfaces the manager's
    /// own `log` calls while debugging a failing test; harmless to call
    /// more than once.
    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    impl Arena {
        fn new(pages: usize) -> Arena {
            init_logging();
            let layout = Layout::from_size_align(pages * PAGE_SIZE, PAGE_SIZE)
                .expect("page-aligned layout should build");
            let ptr = NonNull::new(unsafe { alloc_zeroed(layout) })
                .expect("test allocation should succeed");
            Arena { ptr, layout }
        }

        fn manager(&self, config: ManagerConfig) -> Manager {
            unsafe { Manager::init(self.ptr, self.layout.size(), config) }
                .expect("init should succeed over a freshly allocated arena")
        }
    }

    impl Drop for Arena {
        fn drop(&mut self) {
            unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
        }
    }

    fn rw() -> Prot {
        Prot::READ | Prot::WRITE
    }

    fn anon_private() -> MapFlags {
        MapFlags::ANONYMOUS | MapFlags::PRIVATE
    }

    fn checked_config() -> ManagerConfig {
        ManagerConfig {
            scrub: true,
            sanity: true,
        }
    }

    #[test]
    fn fill_and_drain_leaves_the_list_empty() {
        let arena = Arena::new(1024);
        let manager = arena.manager(checked_config());

        let mut regions = Vec::new();
        for i in 0..16usize {
            let addr = manager
                .map(None, (i + 1) * PAGE_SIZE, rw(), anon_private())
                .expect("plenty of room for sixteen small regions");
            regions.push((addr, (i + 1) * PAGE_SIZE));
        }

        for (addr, size) in regions {
            manager.unmap(addr, size).expect("each region unmaps cleanly");
        }

        let stats = manager.stats();
        assert_eq!(stats.region_count, 0);
        assert_eq!(stats.bytes_mapped, 0);
        assert!(manager.is_sane());
    }

    #[test]
    fn map_reuses_a_freed_interior_gap_and_recoalesces() {
        let arena = Arena::new(64);
        let manager = arena.manager(checked_config());

        let whole = manager
            .map(None, 8 * PAGE_SIZE, rw(), anon_private())
            .expect("map should succeed");
        let hole = whole.checked_add(2 * PAGE_SIZE).unwrap();
        manager.unmap(hole, 2 * PAGE_SIZE).expect("middle unmap should succeed");
        assert_eq!(manager.stats().region_count, 2);

        let reused = manager
            .map(None, 2 * PAGE_SIZE, rw(), anon_private())
            .expect("the freed gap should be reused");
        assert_eq!(reused, hole, "first-fit should place the request flush-left in the freed gap");

        // The new allocation abuts both neighbors, so it recoalesces back
        // into a single region spanning the original extent.
        let stats = manager.stats();
        assert_eq!(stats.region_count, 1);
        assert_eq!(stats.bytes_mapped, 8 * PAGE_SIZE);
    }

    #[test]
    fn unmap_splits_an_interior_range() {
        let arena = Arena::new(64);
        let manager = arena.manager(checked_config());

        let x = manager
            .map(None, 8 * PAGE_SIZE, rw(), anon_private())
            .expect("map should succeed");

        manager
            .unmap(x.checked_add(PAGE_SIZE).unwrap(), 6 * PAGE_SIZE)
            .expect("interior unmap should succeed");

        let stats = manager.stats();
        assert_eq!(stats.region_count, 2);
        assert_eq!(stats.bytes_mapped, 2 * PAGE_SIZE);
        assert!(manager.is_sane());
    }

    #[test]
    fn remap_grows_in_place_when_the_tail_has_room() {
        let arena = Arena::new(64);
        let manager = arena.manager(checked_config());

        // Carve out free space above a region by shrinking a larger one.
        let big = manager
            .map(None, 16 * PAGE_SIZE, rw(), anon_private())
            .expect("map should succeed");
        manager
            .unmap(big.checked_add(8 * PAGE_SIZE).unwrap(), 8 * PAGE_SIZE)
            .expect("suffix unmap should succeed");

        let grown = manager
            .remap(big, 8 * PAGE_SIZE, 16 * PAGE_SIZE, RemapFlags::MAY_MOVE)
            .expect("remap should succeed");
        assert_eq!(grown, big, "growing into free tail space keeps the same address");
        assert_eq!(manager.stats().bytes_mapped, 16 * PAGE_SIZE);
    }

    #[test]
    fn remap_moves_when_request_does_not_reach_the_containing_regions_tail() {
        let arena = Arena::new(64);
        let manager = arena.manager(checked_config());

        // Two back-to-back maps abut and coalesce into one sixteen-page
        // region; the lower half's own original extent no longer reaches
        // that region's tail, so growing it in place is impossible.
        let lower = manager
            .map(None, 8 * PAGE_SIZE, rw(), anon_private())
            .expect("map should succeed");
        manager
            .map(None, 8 * PAGE_SIZE, rw(), anon_private())
            .expect("map should succeed");
        assert_eq!(manager.stats().region_count, 1);

        let moved = manager
            .remap(lower, 8 * PAGE_SIZE, 16 * PAGE_SIZE, RemapFlags::MAY_MOVE)
            .expect("remap should succeed by moving");
        assert_ne!(moved, lower, "the lower half cannot grow in place past its sibling");
        assert!(manager.is_sane());
    }

    #[test]
    fn remap_with_unchanged_size_is_a_no_op() {
        let arena = Arena::new(16);
        let manager = arena.manager(checked_config());

        let addr = manager
            .map(None, 4 * PAGE_SIZE, rw(), anon_private())
            .expect("map should succeed");
        let result = manager
            .remap(addr, 4 * PAGE_SIZE, 4 * PAGE_SIZE, RemapFlags::MAY_MOVE)
            .expect("no-op remap should succeed");
        assert_eq!(result, addr);
    }

    #[test]
    fn repeated_mapping_exhausts_the_address_space() {
        let pages = 16 * 1024; // 64 MiB / 4 KiB page
        let length = pages * PAGE_SIZE;
        let map_size = 64 * PAGE_SIZE;

        // The same arithmetic `Manager::init` uses to size the descriptor
        // pool, so the expected count tracks the real layout instead of a
        // separately hand-computed constant.
        let descriptor_bytes = pages * std::mem::size_of::<Descriptor>();
        let pool_bytes = round_up_to_page(descriptor_bytes)
            .expect("descriptor pool size should not overflow for this arena");
        let expected_successes = (length - pool_bytes) / map_size;

        let arena = Arena::new(pages);
        let manager = arena.manager(checked_config());

        let mut successes = 0usize;
        loop {
            match manager.map(None, map_size, rw(), anon_private()) {
                Ok(_) => successes += 1,
                Err(e) => {
                    assert_eq!(e.kind, crate::error::ErrorKind::OutOfMemory);
                    break;
                }
            }
            assert!(manager.is_sane(), "sanity must hold after every successful map");
        }
        assert!(manager.is_sane(), "sanity must hold after the failing map too");
        assert_eq!(successes, expected_successes);
    }

    #[test]
    fn fresh_map_reads_as_zero() {
        let arena = Arena::new(16);
        let manager = arena.manager(checked_config());

        let addr = manager
            .map(None, 4 * PAGE_SIZE, rw(), anon_private())
            .expect("map should succeed");
        let slice = unsafe {
            std::slice::from_raw_parts(
                arena.ptr.as_ptr().add(addr.distance_from(Address::new(arena.ptr.as_ptr() as usize))),
                4 * PAGE_SIZE,
            )
        };
        assert!(slice.iter().all(|&b| b == 0));
    }

    #[test]
    fn map_unmap_remap_exercise_every_policy_branch() {
        let arena = Arena::new(128);
        let manager = arena.manager(checked_config());

        // Fresh allocation into an empty list: map_fresh + map_top_gap.
        let r = manager
            .map(None, 20 * PAGE_SIZE, rw(), anon_private())
            .expect("initial map should succeed");

        // A second top-gap allocation always abuts the existing head: map_extend_right.
        let merged = manager
            .map(None, 4 * PAGE_SIZE, rw(), anon_private())
            .expect("second map should succeed");
        assert_eq!(manager.stats().region_count, 1);
        assert_eq!(merged, r.checked_sub(4 * PAGE_SIZE).unwrap());

        // Split the merged region's middle, opening a 16-page interior gap: unmap_middle.
        let hole_start = merged.checked_add(4 * PAGE_SIZE).unwrap();
        manager
            .unmap(hole_start, 16 * PAGE_SIZE)
            .expect("middle unmap should succeed");
        assert_eq!(manager.stats().region_count, 2);

        // Fill part of the gap, abutting only the left remainder: map_interior_fit + map_grow_left.
        let grown = manager
            .map(None, 4 * PAGE_SIZE, rw(), anon_private())
            .expect("partial gap fill should succeed");
        assert_eq!(grown, hole_start);

        // Fill the rest of the gap, abutting both neighbors: map_coalesce_both.
        manager
            .map(None, 12 * PAGE_SIZE, rw(), anon_private())
            .expect("remaining gap fill should succeed");
        assert_eq!(manager.stats().region_count, 1);

        // Release the region's head, then its tail, then what's left:
        // unmap_prefix, unmap_suffix, unmap_full.
        manager
            .unmap(merged, 4 * PAGE_SIZE)
            .expect("prefix unmap should succeed");
        let after_prefix = merged.checked_add(4 * PAGE_SIZE).unwrap();
        manager
            .unmap(after_prefix.checked_add(16 * PAGE_SIZE).unwrap(), 4 * PAGE_SIZE)
            .expect("suffix unmap should succeed");
        manager
            .unmap(after_prefix, 16 * PAGE_SIZE)
            .expect("full unmap should succeed");
        assert_eq!(manager.stats().region_count, 0);

        // A fresh region to drive the remap branches.
        let x = manager
            .map(None, 8 * PAGE_SIZE, rw(), anon_private())
            .expect("map should succeed");

        // remap_noop.
        assert_eq!(
            manager
                .remap(x, 8 * PAGE_SIZE, 8 * PAGE_SIZE, RemapFlags::MAY_MOVE)
                .expect("no-op remap should succeed"),
            x
        );

        // remap_shrink.
        assert_eq!(
            manager
                .remap(x, 8 * PAGE_SIZE, 4 * PAGE_SIZE, RemapFlags::MAY_MOVE)
                .expect("shrink should succeed"),
            x
        );

        // remap_grow_in_place: nothing to the region's right, so it just extends.
        assert_eq!(
            manager
                .remap(x, 4 * PAGE_SIZE, 8 * PAGE_SIZE, RemapFlags::MAY_MOVE)
                .expect("grow in place should succeed"),
            x
        );

        // Split the region's middle again, then grow the head back into the
        // gap exactly far enough to touch the tail: remap_grow_in_place_coalesce.
        manager
            .unmap(x.checked_add(2 * PAGE_SIZE).unwrap(), 4 * PAGE_SIZE)
            .expect("middle unmap should succeed");
        assert_eq!(
            manager
                .remap(x, 2 * PAGE_SIZE, 6 * PAGE_SIZE, RemapFlags::MAY_MOVE)
                .expect("grow in place with coalesce should succeed"),
            x
        );
        assert_eq!(manager.stats().region_count, 1);
        assert_eq!(manager.stats().bytes_mapped, 8 * PAGE_SIZE);

        // Nothing free to its right at all: remap_grow_move.
        let moved = manager
            .remap(x, 8 * PAGE_SIZE, 16 * PAGE_SIZE, RemapFlags::MAY_MOVE)
            .expect("remap should succeed by moving");
        assert_ne!(moved, x);

        assert!(manager.is_sane());
        assert!(
            manager.coverage().is_full(),
            "every map/unmap/remap policy branch should have fired: {:?}",
            manager.coverage()
        );
    }

    proptest! {
        #[test]
        fn random_map_unmap_traces_never_violate_sanity(
            ops in vec((any::<bool>(), 1usize..8), 1..40)
        ) {
            let arena = Arena::new(256);
            let manager = arena.manager(checked_config());
            let mut live: Vec<(Address, usize)> = Vec::new();

            for (do_map, size_pages) in ops {
                if do_map || live.is_empty() {
                    if let Ok(addr) = manager.map(None, size_pages * PAGE_SIZE, rw(), anon_private()) {
                        live.push((addr, size_pages * PAGE_SIZE));
                    }
                } else {
                    let index = size_pages % live.len();
                    let (addr, size) = live.swap_remove(index);
                    manager.unmap(addr, size).expect("tracked regions always unmap cleanly");
                }
                prop_assert!(manager.is_sane());
            }
        }
    }
}
