//! Allocator Surface (§4.6).
//!
//! The four hook functions every allocation in the process passes through.
//! Each follows the same prologue as
//! `original_source/interceptor/memcloud_vm.c`: if the calling thread is
//! already inside hook dispatch, fall through to the real allocator
//! immediately; otherwise set the guard, bootstrap if needed, and route the
//! request by size.
//!
//! On Linux, BSD and illumos these are exported as `#[no_mangle] extern "C"`
//! symbols named exactly `malloc`/`calloc`/`realloc`/`free`, so `LD_PRELOAD`
//! replaces libc's own. On macOS they keep their Rust-mangled names and are
//! wired in through `os::macos_interpose`'s `__DATA,__interpose` table
//! instead, since `dyld` does not honor same-named exports the way the
//! Linux-family dynamic linkers do.

use crate::guard::GuardScope;
use crate::{engine, page, symbols};
use std::ffi::c_void;

unsafe fn route_new(size: usize) -> *mut c_void {
  if guard_active() {
    return symbols::internal_malloc(size);
  }
  let _scope = GuardScope::enter();

  let engine = engine::ensure_bootstrapped();
  if size >= engine.config.threshold {
    match engine.manager.create(size) {
      Ok(region) => region.base as *mut c_void,
      // §4.6: a request routed to remote must not silently degrade to
      // local memory once the threshold check has admitted it — the
      // caller's further accesses rely on the fault handler finding a
      // matching region, which a null return here would not provide.
      Err(err) => engine::abort_process(&format!("remote allocation of {} bytes failed: {}", size, err)),
    }
  } else {
    symbols::internal_malloc(size)
  }
}

unsafe fn route_free(ptr: *mut c_void) {
  if ptr.is_null() {
    return;
  }
  if guard_active() {
    symbols::internal_free(ptr);
    return;
  }
  let _scope = GuardScope::enter();

  let engine = engine::ensure_bootstrapped();
  match engine.manager.region_for(ptr as *const u8) {
    Some(region) => {
      if let Err(err) = engine.manager.destroy(region) {
        log::warn!("vmproxy: failed to destroy region at {:p}: {}", ptr, err);
      }
    }
    None => symbols::internal_free(ptr),
  }
}

#[inline]
fn guard_active() -> bool {
  crate::guard::is_set()
}

/// Allocates `size` bytes, routing to the remote store when `size` is at or
/// above the configured threshold.
///
/// # Safety
/// Has the same contract as libc's `malloc`.
#[cfg_attr(not(target_os = "macos"), no_mangle)]
pub unsafe extern "C" fn malloc(size: usize) -> *mut c_void {
  route_new(size)
}

/// Allocates `count * size` bytes, zeroed, routing to the remote store when
/// the total size is at or above the configured threshold.
///
/// # Safety
/// Has the same contract as libc's `calloc`.
#[cfg_attr(not(target_os = "macos"), no_mangle)]
pub unsafe extern "C" fn calloc(count: usize, size: usize) -> *mut c_void {
  let total = match count.checked_mul(size) {
    Some(total) => total,
    None => return std::ptr::null_mut(),
  };

  if guard_active() {
    return symbols::internal_calloc(count, size);
  }
  let _scope = GuardScope::enter();

  let engine = engine::ensure_bootstrapped();
  if total >= engine.config.threshold {
    match engine.manager.create(total) {
      // `create` reserves fresh address space with no-access protection;
      // the fault handler's first touch materializes a remote page, which
      // the mock and real store both return zeroed for a never-stored page
      // (§4.3), so no extra zeroing is needed here.
      Ok(region) => region.base as *mut c_void,
      Err(err) => engine::abort_process(&format!("remote allocation of {} bytes failed: {}", total, err)),
    }
  } else {
    symbols::internal_calloc(count, size)
  }
}

/// Resizes a previous allocation, preserving its contents up to the smaller
/// of the old and new sizes.
///
/// # Safety
/// Has the same contract as libc's `realloc`.
#[cfg_attr(not(target_os = "macos"), no_mangle)]
pub unsafe extern "C" fn realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
  if ptr.is_null() {
    return route_new(size);
  }
  if size == 0 {
    route_free(ptr);
    return std::ptr::null_mut();
  }

  if guard_active() {
    return symbols::internal_realloc(ptr, size);
  }
  let _scope = GuardScope::enter();

  let engine = engine::ensure_bootstrapped();
  match engine.manager.region_for(ptr as *const u8) {
    Some(region) => match engine.manager.realloc(region, size) {
      Ok(new_region) => new_region.base as *mut c_void,
      Err(_) => std::ptr::null_mut(),
    },
    None => {
      if size >= engine.config.threshold {
        // Growing a small, internally-allocated pointer past the
        // threshold: admit it remotely and copy the old contents across,
        // since the caller expects `realloc`'s usual move semantics.
        let old_size = symbols::usable_size(ptr);
        match engine.manager.create(size) {
          Ok(region) => {
            let page_size = page::size();
            let copy_len = old_size.min(size);
            let page_count = page::count(copy_len);
            for page_index in 0..page_count {
              let mut buf = vec![0u8; page_size];
              let start = page_index * page_size;
              let chunk = (copy_len - start).min(page_size);
              std::ptr::copy_nonoverlapping((ptr as *const u8).add(start), buf.as_mut_ptr(), chunk);
              let _ = engine.manager.store().vm_store(region.remote_id, page_index, &buf);
            }
            symbols::internal_free(ptr);
            region.base as *mut c_void
          }
          Err(_) => std::ptr::null_mut(),
        }
      } else {
        symbols::internal_realloc(ptr, size)
      }
    }
  }
}

/// Releases a previous allocation.
///
/// # Safety
/// Has the same contract as libc's `free`.
#[cfg_attr(not(target_os = "macos"), no_mangle)]
pub unsafe extern "C" fn free(ptr: *mut c_void) {
  route_free(ptr)
}
