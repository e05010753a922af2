//! Raw mapping primitive for Windows, used by the Region Manager and the
//! Fault Handler even though the allocator-interposition strategy (§9
//! "Dynamic dispatch / hooks") is not implemented for this platform — see
//! `hooks.rs` and DESIGN.md.

use crate::protection::Protection;
use crate::{Error, Result};
use std::ptr;
use winapi::shared::basetsd::SIZE_T;
use winapi::shared::minwindef::LPVOID;
use winapi::um::memoryapi::{VirtualAlloc, VirtualFree, VirtualProtect};
use winapi::um::sysinfoapi::{GetSystemInfo, SYSTEM_INFO};
use winapi::um::winnt::{
  MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_NOACCESS, PAGE_READONLY, PAGE_READWRITE,
};

/// Returns the operating system's page size, cached after the first call.
pub fn page_size() -> usize {
  lazy_static::lazy_static! {
    static ref PAGESIZE: usize = unsafe {
      let mut info: SYSTEM_INFO = std::mem::zeroed();
      GetSystemInfo(&mut info);
      info.dwPageSize as usize
    };
  }

  *PAGESIZE
}

fn to_native(protection: Protection) -> u32 {
  if protection.contains(Protection::READ_WRITE) {
    PAGE_READWRITE
  } else if protection.contains(Protection::READ) {
    PAGE_READONLY
  } else {
    PAGE_NOACCESS
  }
}

/// Reserves and commits `size` bytes with the given protection.
pub fn reserve(size: usize, protection: Protection) -> Result<*mut u8> {
  unsafe {
    let addr = VirtualAlloc(
      ptr::null_mut(),
      size as SIZE_T,
      MEM_RESERVE | MEM_COMMIT,
      to_native(protection),
    );

    if addr.is_null() {
      return Err(Error::AddressSpaceExhausted(size, errno::errno()));
    }

    Ok(addr as *mut u8)
  }
}

/// Commits a single page at the fixed address `addr`.
///
/// # Safety
///
/// `addr` must be page-aligned and lie within a range this process reserved
/// earlier.
pub unsafe fn map_fixed(addr: *mut u8, len: usize, protection: Protection) -> Result<()> {
  let result = VirtualAlloc(addr as LPVOID, len as SIZE_T, MEM_COMMIT, to_native(protection));

  if result.is_null() || result != addr as LPVOID {
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
  let mut previous = 0;
  let ok = VirtualProtect(addr as LPVOID, len as SIZE_T, to_native(protection), &mut previous);

  if ok == 0 {
    return Err(Error::SystemCall(errno::errno()));
  }

  Ok(())
}

/// Releases the entire reservation starting at `addr`.
///
/// # Safety
///
/// `addr` must be the base address returned by [`reserve`]; no other thread
/// may be accessing the range concurrently.
pub unsafe fn unmap(addr: *mut u8, _len: usize) -> Result<()> {
  if VirtualFree(addr as LPVOID, 0, MEM_RELEASE) == 0 {
    return Err(Error::SystemCall(errno::errno()));
  }

  Ok(())
}
