//! POSIX raw mapping primitive, shared by Linux, macOS, FreeBSD, OpenBSD and
//! illumos: they all expose the same `mmap`/`mprotect`/`munmap` surface for
//! anonymous memory.

use crate::protection::Protection;
use crate::{Error, Result};
use lazy_static::lazy_static;
use std::ptr;

/// Returns the operating system's page size, cached after the first call.
pub fn page_size() -> usize {
  lazy_static! {
    static ref PAGESIZE: usize = unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize };
  }

  *PAGESIZE
}

fn to_native(protection: Protection) -> libc::c_int {
  let mut native = libc::PROT_NONE;

  if protection.contains(Protection::READ) {
    native |= libc::PROT_READ;
  }
  if protection.contains(Protection::WRITE) {
    native |= libc::PROT_WRITE;
  }

  native
}

/// Reserves `size` bytes of address space with the given protection.
///
/// The kernel chooses the base address. Used by the Region Manager to
/// create a fresh, not-resident region (`Protection::NONE`).
pub fn reserve(size: usize, protection: Protection) -> Result<*mut u8> {
  unsafe {
    let addr = libc::mmap(
      ptr::null_mut(),
      size,
      to_native(protection),
      libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
      -1,
      0,
    );

    if addr == libc::MAP_FAILED {
      return Err(Error::AddressSpaceExhausted(size, errno::errno()));
    }

    Ok(addr as *mut u8)
  }
}

/// Maps exactly one page at the fixed address `addr`, demanding the kernel
/// either place it there or fail.
///
/// # Safety
///
/// `addr` must be page-aligned and must lie within address space this
/// process already reserved (e.g. via [`reserve`]); this call replaces
/// whatever mapping currently covers that page.
pub unsafe fn map_fixed(addr: *mut u8, len: usize, protection: Protection) -> Result<()> {
  let result = libc::mmap(
    addr as *mut libc::c_void,
    len,
    to_native(protection),
    libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_FIXED,
    -1,
    0,
  );

  if result == libc::MAP_FAILED || result != addr as *mut libc::c_void {
    return Err(Error::SystemCall(errno::errno()));
  }

  Ok(())
}

/// Changes the protection of `[addr, addr + len)`.
///
/// # Safety
///
/// `addr` must be page-aligned and the range must lie within a live
/// mapping.
pub unsafe fn protect(addr: *mut u8, len: usize, protection: Protection) -> Result<()> {
  let result = libc::mprotect(addr as *mut libc::c_void, len, to_native(protection));

  if result != 0 {
    return Err(Error::SystemCall(errno::errno()));
  }

  Ok(())
}

/// Releases `[addr, addr + len)` back to the kernel.
///
/// # Safety
///
/// `addr` must name a mapping this process owns in full; no other thread
/// may be faulting against it concurrently.
pub unsafe fn unmap(addr: *mut u8, len: usize) -> Result<()> {
  if libc::munmap(addr as *mut libc::c_void, len) != 0 {
    return Err(Error::SystemCall(errno::errno()));
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn reserve_then_unmap_roundtrips() {
    let size = page_size() * 4;
    let addr = reserve(size, Protection::NONE).expect("reserve");
    unsafe { unmap(addr, size).expect("unmap") };
  }

  #[test]
  fn protect_then_write() {
    let size = page_size();
    let addr = reserve(size, Protection::NONE).expect("reserve");

    unsafe {
      protect(addr, size, Protection::READ_WRITE).expect("protect");
      addr.write(0xAB);
      assert_eq!(addr.read(), 0xAB);
      unmap(addr, size).expect("unmap");
    }
  }
}
