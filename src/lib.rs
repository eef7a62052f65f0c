//! A page-granular virtual memory manager for confined address spaces:
//! `brk`/`sbrk`-style linear growth plus `map`/`unmap`/`remap` over a
//! byte range the caller reserves once at startup and the manager
//! never returns to the host OS.
mod address;
mod coverage;
mod descriptor;
mod error;
mod ffi;
mod flags;
mod manager;
mod region_list;
mod sanity;

pub use address::{round_up_to_page, Address, PAGE_SIZE};
pub use error::{Error, ErrorKind, Result};
pub use flags::{MapFlags, Prot, RemapFlags};
pub use manager::{Manager, ManagerConfig, Stats};

pub use ffi::{
    vmman_brk, vmman_destroy, vmman_init, vmman_is_sane, vmman_map, vmman_remap, vmman_set_sanity,
    vmman_stats, vmman_unmap, VmmanHandle, VmmanStats,
};
