//! The C-callable edge: thin `extern "C"` wrappers around the safe
//! `Manager` API. Each function validates and converts its input, calls
//! into the safe core, and collapses the result to a sentinel a C
//! caller can check. No invariant logic lives here; every precondition
//! is re-checked by the safe core regardless of what a C caller passes
//! in.
use std::os::raw::{c_int, c_void};
use std::ptr::NonNull;

use crate::address::Address;
use crate::error::ErrorKind;
use crate::flags::{MapFlags, Prot, RemapFlags};
use crate::manager::{Manager, ManagerConfig, Stats};

/// A C-layout mirror of `Stats`, written through an out-pointer since
/// `extern "C"` return values must be FFI-safe scalars or `#[repr(C)]`
/// structs.
#[repr(C)]
pub struct VmmanStats {
    pub region_count: usize,
    pub bytes_mapped: usize,
    pub bytes_free: usize,
    pub descriptors_in_use: usize,
    pub descriptors_capacity: usize,
}

impl From<Stats> for VmmanStats {
    fn from(stats: Stats) -> Self {
        VmmanStats {
            region_count: stats.region_count,
            bytes_mapped: stats.bytes_mapped,
            bytes_free: stats.bytes_free,
            descriptors_in_use: stats.descriptors_in_use,
            descriptors_capacity: stats.descriptors_capacity,
        }
    }
}

/// An opaque handle to a `Manager`, returned by `vmman_init` and
/// consumed by every other `vmman_*` call.
#[repr(transparent)]
pub struct VmmanHandle(*mut Manager);

fn kind_to_errno(kind: ErrorKind) -> c_int {
    match kind {
        ErrorKind::InvalidParameter => 1,
        ErrorKind::OutOfMemory => 2,
        ErrorKind::Failure => 3,
        ErrorKind::Unexpected => 4,
    }
}

/// Initializes a manager over `length` bytes starting at `base`, and
/// returns an opaque handle, or a null handle on failure.
///
/// # Safety
///
/// `base` must point to `length` valid, exclusively-owned,
/// page-aligned bytes for the lifetime of the returned handle.
#[no_mangle]
pub unsafe extern "C" fn vmman_init(
    base: *mut c_void,
    length: usize,
    scrub: bool,
    out_errno: *mut c_int,
) -> VmmanHandle {
    let base = match NonNull::new(base as *mut u8) {
        Some(base) => base,
        None => {
            if !out_errno.is_null() {
                *out_errno = kind_to_errno(ErrorKind::InvalidParameter);
            }
            return VmmanHandle(std::ptr::null_mut());
        }
    };

    let config = ManagerConfig {
        scrub,
        sanity: false,
    };

    match Manager::init(base, length, config) {
        Ok(manager) => VmmanHandle(Box::into_raw(Box::new(manager))),
        Err(e) => {
            if !out_errno.is_null() {
                *out_errno = kind_to_errno(e.kind);
            }
            VmmanHandle(std::ptr::null_mut())
        }
    }
}

/// # Safety
///
/// `handle` must have been returned by `vmman_init` and not yet freed.
unsafe fn manager<'a>(handle: &'a VmmanHandle) -> Option<&'a Manager> {
    handle.0.as_ref()
}

/// Sets `brk` to `new_brk` unconditionally. Returns 0 on success, or a
/// positive errno-style code from `kind_to_errno` on failure.
///
/// # Safety
///
/// `handle` must be a live handle returned by `vmman_init`.
#[no_mangle]
pub unsafe extern "C" fn vmman_brk(handle: &VmmanHandle, new_brk: usize) -> c_int {
    let manager = match manager(handle) {
        Some(m) => m,
        None => return kind_to_errno(ErrorKind::Unexpected),
    };

    match manager.brk(Address::new(new_brk)) {
        Ok(()) => 0,
        Err(e) => kind_to_errno(e.kind),
    }
}

/// # Safety
///
/// `handle` must be a live handle returned by `vmman_init`.
#[no_mangle]
pub unsafe extern "C" fn vmman_map(
    handle: &VmmanHandle,
    length: usize,
    prot: u32,
    flags: u32,
    out_errno: *mut c_int,
) -> usize {
    let manager = match manager(handle) {
        Some(m) => m,
        None => {
            if !out_errno.is_null() {
                *out_errno = kind_to_errno(ErrorKind::Unexpected);
            }
            return 0;
        }
    };

    let prot = Prot::from_bits_truncate(prot);
    let flags = MapFlags::from_bits_truncate(flags);

    match manager.map(None, length, prot, flags) {
        Ok(addr) => addr.0,
        Err(e) => {
            if !out_errno.is_null() {
                *out_errno = kind_to_errno(e.kind);
            }
            0
        }
    }
}

/// # Safety
///
/// `handle` must be a live handle returned by `vmman_init`.
#[no_mangle]
pub unsafe extern "C" fn vmman_unmap(handle: &VmmanHandle, addr: usize, length: usize) -> c_int {
    let manager = match manager(handle) {
        Some(m) => m,
        None => return kind_to_errno(ErrorKind::Unexpected),
    };

    match manager.unmap(Address::new(addr), length) {
        Ok(()) => 0,
        Err(e) => kind_to_errno(e.kind),
    }
}

/// # Safety
///
/// `handle` must be a live handle returned by `vmman_init`.
#[no_mangle]
pub unsafe extern "C" fn vmman_remap(
    handle: &VmmanHandle,
    addr: usize,
    old_size: usize,
    new_size: usize,
    out_errno: *mut c_int,
) -> usize {
    let manager = match manager(handle) {
        Some(m) => m,
        None => {
            if !out_errno.is_null() {
                *out_errno = kind_to_errno(ErrorKind::Unexpected);
            }
            return 0;
        }
    };

    match manager.remap(Address::new(addr), old_size, new_size, RemapFlags::MAY_MOVE) {
        Ok(addr) => addr.0,
        Err(e) => {
            if !out_errno.is_null() {
                *out_errno = kind_to_errno(e.kind);
            }
            0
        }
    }
}

/// # Safety
///
/// `handle` must be a live handle returned by `vmman_init`.
#[no_mangle]
pub unsafe extern "C" fn vmman_is_sane(handle: &VmmanHandle) -> bool {
    match manager(handle) {
        Some(m) => m.is_sane(),
        None => false,
    }
}

/// # Safety
///
/// `handle` must be a live handle returned by `vmman_init`.
#[no_mangle]
pub unsafe extern "C" fn vmman_set_sanity(handle: &VmmanHandle, enabled: bool) {
    if let Some(m) = manager(handle) {
        m.set_sanity(enabled);
    }
}

/// Writes an occupancy snapshot to `*out`.
///
/// # Safety
///
/// `handle` must be a live handle returned by `vmman_init`, and `out`
/// must point to a valid, writable `VmmanStats`.
#[no_mangle]
pub unsafe extern "C" fn vmman_stats(handle: &VmmanHandle, out: *mut VmmanStats) {
    if let (Some(m), false) = (manager(handle), out.is_null()) {
        *out = m.stats().into();
    }
}

/// Drops the manager and frees the handle. Does not touch the
/// underlying memory range, which remains the caller's to release.
///
/// # Safety
///
/// `handle` must have been returned by `vmman_init` and must not be
/// used again after this call.
#[no_mangle]
pub unsafe extern "C" fn vmman_destroy(handle: VmmanHandle) {
    if !handle.0.is_null() {
        drop(Box::from_raw(handle.0));
    }
}
