//! Symbol Resolver (§4.1).
//!
//! Locates the genuine underlying `malloc`/`calloc`/`realloc`/`free`, used
//! as the "internal allocator" that the recursion guard falls back to.
//! Resolution itself must not re-enter the hooks; on the common Unix path
//! that means calling `dlsym(RTLD_NEXT, ...)` directly rather than through
//! any wrapper that might allocate, and on macOS it means going through the
//! default malloc zone rather than `dlsym`, mirroring
//! `original_source/interceptor/memcloud_vm.c`'s `#ifdef __APPLE__` split.

use std::ffi::c_void;
use std::os::raw::c_char;
use std::sync::Once;

type MallocFn = unsafe extern "C" fn(usize) -> *mut c_void;
type CallocFn = unsafe extern "C" fn(usize, usize) -> *mut c_void;
type ReallocFn = unsafe extern "C" fn(*mut c_void, usize) -> *mut c_void;
type FreeFn = unsafe extern "C" fn(*mut c_void);

struct RealSymbols {
  malloc: MallocFn,
  calloc: CallocFn,
  realloc: ReallocFn,
  free: FreeFn,
}

unsafe impl Sync for RealSymbols {}

static mut REAL: Option<RealSymbols> = None;
static RESOLVE_ONCE: Once = Once::new();

#[cfg(not(target_os = "macos"))]
unsafe fn resolve() -> RealSymbols {
  // `CString` would itself allocate, and nothing is resolved yet for the
  // guard to fall back to — so each name is passed as a already-terminated
  // byte string, not built at runtime.
  unsafe fn dlsym_next(name: &'static [u8]) -> *mut c_void {
    libc::dlsym(libc::RTLD_NEXT, name.as_ptr() as *const c_char)
  }

  let malloc = dlsym_next(b"malloc\0");
  let calloc = dlsym_next(b"calloc\0");
  let realloc = dlsym_next(b"realloc\0");
  let free = dlsym_next(b"free\0");

  assert!(!malloc.is_null(), "dlsym(RTLD_NEXT, \"malloc\") failed");
  assert!(!calloc.is_null(), "dlsym(RTLD_NEXT, \"calloc\") failed");
  assert!(!realloc.is_null(), "dlsym(RTLD_NEXT, \"realloc\") failed");
  assert!(!free.is_null(), "dlsym(RTLD_NEXT, \"free\") failed");

  RealSymbols {
    malloc: std::mem::transmute(malloc),
    calloc: std::mem::transmute(calloc),
    realloc: std::mem::transmute(realloc),
    free: std::mem::transmute(free),
  }
}

#[cfg(target_os = "macos")]
unsafe fn resolve() -> RealSymbols {
  extern "C" {
    fn malloc_default_zone() -> *mut c_void;
    fn malloc_zone_malloc(zone: *mut c_void, size: usize) -> *mut c_void;
    fn malloc_zone_calloc(zone: *mut c_void, count: usize, size: usize) -> *mut c_void;
    fn malloc_zone_realloc(zone: *mut c_void, ptr: *mut c_void, size: usize) -> *mut c_void;
    fn malloc_zone_free(zone: *mut c_void, ptr: *mut c_void);
  }

  // The zone pointer is looked up once and closed over by these thin
  // `extern "C" fn`s, since `RealSymbols` only has room for bare function
  // pointers (no captured state) to keep the internal-allocator call sites
  // in `engine::internal_*` uniform across platforms.
  static mut ZONE: *mut c_void = std::ptr::null_mut();
  ZONE = malloc_default_zone();

  unsafe extern "C" fn zone_malloc(size: usize) -> *mut c_void {
    malloc_zone_malloc(ZONE, size)
  }
  unsafe extern "C" fn zone_calloc(count: usize, size: usize) -> *mut c_void {
    malloc_zone_calloc(ZONE, count, size)
  }
  unsafe extern "C" fn zone_realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
    malloc_zone_realloc(ZONE, ptr, size)
  }
  unsafe extern "C" fn zone_free(ptr: *mut c_void) {
    malloc_zone_free(ZONE, ptr)
  }

  RealSymbols {
    malloc: zone_malloc,
    calloc: zone_calloc,
    realloc: zone_realloc,
    free: zone_free,
  }
}

/// Resolves the real allocator symbols exactly once. Idempotent; safe to
/// call from every hook's prologue via `ensure_bootstrapped`.
pub fn ensure_resolved() {
  RESOLVE_ONCE.call_once(|| unsafe {
    REAL = Some(resolve());
  });
}

#[inline]
fn real() -> &'static RealSymbols {
  unsafe { REAL.as_ref().expect("symbols resolved before use") }
}

/// Calls the real `malloc`, bypassing routing entirely.
///
/// # Safety
/// See `libc::malloc`.
pub unsafe fn internal_malloc(size: usize) -> *mut c_void {
  (real().malloc)(size)
}

/// Calls the real `calloc`, bypassing routing entirely.
///
/// # Safety
/// See `libc::calloc`.
pub unsafe fn internal_calloc(count: usize, size: usize) -> *mut c_void {
  (real().calloc)(count, size)
}

/// Calls the real `realloc`, bypassing routing entirely.
///
/// # Safety
/// See `libc::realloc`.
pub unsafe fn internal_realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
  (real().realloc)(ptr, size)
}

/// Calls the real `free`, bypassing routing entirely.
///
/// # Safety
/// See `libc::free`.
pub unsafe fn internal_free(ptr: *mut c_void) {
  (real().free)(ptr)
}

/// Returns the usable size of a pointer previously returned by
/// [`internal_malloc`]/[`internal_realloc`]/[`internal_calloc`], used by
/// `manager::realloc` when growing a small allocation into a remote region.
pub fn usable_size(ptr: *mut c_void) -> usize {
  #[cfg(target_os = "macos")]
  unsafe {
    extern "C" {
      fn malloc_size(ptr: *const c_void) -> usize;
    }
    malloc_size(ptr)
  }

  #[cfg(not(target_os = "macos"))]
  unsafe {
    libc::malloc_usable_size(ptr)
  }
}
