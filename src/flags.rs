//! Protection and mapping flags, mirroring POSIX `mmap`'s `PROT_*` /
//! `MAP_*` constants closely enough that a host-side shim can pass
//! them straight through.
use bitflags::bitflags;

bitflags! {
    /// Memory protection bits. Informational at this layer: the
    /// manager tracks them on the descriptor but never changes page
    /// protection after a region is created.
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct Prot: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXEC = 1 << 2;
    }
}

bitflags! {
    /// Mapping flags passed to `map`. `map` requires `ANONYMOUS |
    /// PRIVATE` and rejects `SHARED` or `FIXED`: every region is an
    /// anonymous, private mapping with no fixed-address placement.
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct MapFlags: u32 {
        const ANONYMOUS = 1 << 0;
        const PRIVATE = 1 << 1;
        const SHARED = 1 << 2;
        const FIXED = 1 << 3;
    }
}

bitflags! {
    /// Flags accepted by `remap`. The only defined value is
    /// `MayMove`, whose sole observable effect is permitting `remap`
    /// to relocate the region when it cannot grow in place.
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct RemapFlags: u32 {
        const MAY_MOVE = 1 << 0;
    }
}

/// The protection bits required of every region created by `map`:
/// read and write, never exec.
pub fn is_valid_map_prot(prot: Prot) -> bool {
    prot.contains(Prot::READ) && prot.contains(Prot::WRITE) && !prot.contains(Prot::EXEC)
}

/// The flag bits required of every region created by `map`: anonymous
/// and private, never shared or fixed.
pub fn is_valid_map_flags(flags: MapFlags) -> bool {
    flags.contains(MapFlags::ANONYMOUS)
        && flags.contains(MapFlags::PRIVATE)
        && !flags.contains(MapFlags::SHARED)
        && !flags.contains(MapFlags::FIXED)
}
