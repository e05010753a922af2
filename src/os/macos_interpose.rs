//! Mach-O symbol interposition, mirroring `DYLD_INTERPOSE` from
//! `original_source/interceptor/memcloud_vm.c`.
//!
//! Linux-family dynamic linkers resolve `LD_PRELOAD`ed symbols named exactly
//! `malloc`/`calloc`/`realloc`/`free` in place of libc's own; `dyld` instead
//! requires each replacement to be registered in a `__DATA,__interpose`
//! section as a `(replacement, original)` pointer pair. This module builds
//! that table; `hooks::malloc`/`calloc`/`realloc`/`free` remain ordinary
//! (non-`malloc`-named) exported symbols on this platform.

#[repr(C)]
struct Interpose {
  replacement: *const (),
  original: *const (),
}

unsafe impl Sync for Interpose {}

extern "C" {
  fn malloc(size: usize) -> *mut std::ffi::c_void;
  fn calloc(count: usize, size: usize) -> *mut std::ffi::c_void;
  fn realloc(ptr: *mut std::ffi::c_void, size: usize) -> *mut std::ffi::c_void;
  fn free(ptr: *mut std::ffi::c_void);
}

#[used]
#[link_section = "__DATA,__interpose"]
static INTERPOSE_MALLOC: Interpose = Interpose {
  replacement: crate::hooks::malloc as *const (),
  original: malloc as *const (),
};

#[used]
#[link_section = "__DATA,__interpose"]
static INTERPOSE_CALLOC: Interpose = Interpose {
  replacement: crate::hooks::calloc as *const (),
  original: calloc as *const (),
};

#[used]
#[link_section = "__DATA,__interpose"]
static INTERPOSE_REALLOC: Interpose = Interpose {
  replacement: crate::hooks::realloc as *const (),
  original: realloc as *const (),
};

#[used]
#[link_section = "__DATA,__interpose"]
static INTERPOSE_FREE: Interpose = Interpose {
  replacement: crate::hooks::free as *const (),
  original: free as *const (),
};
