//! The raw mapping primitive and the page-size query.
//!
//! This module is the only place that talks to the operating system's
//! virtual memory API directly. Everything above it (the region table, the
//! region manager, the fault handler) works purely in terms of `*mut u8`
//! addresses, byte counts and [`Protection`](crate::protection::Protection)
//! flags.
//!
//! The functions here must be safe to call bypassing the allocator hooks
//! themselves (the Symbol Resolver, §4.1, relies on that): none of them
//! touch the Rust heap.

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub use self::unix::*;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use self::windows::*;

#[cfg(target_os = "macos")]
pub mod macos_interpose;

/// Rounds an address down to its closest page boundary.
pub fn page_floor(address: usize) -> usize {
  address & !(page_size() - 1)
}

/// Rounds an address up to its closest page boundary.
pub fn page_ceil(address: usize) -> usize {
  let pz = page_size();
  (address + pz - 1) & !(pz - 1)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn page_size_value() {
    let pz = page_size();
    assert!(pz > 0);
    assert_eq!(pz % 2, 0);
  }

  #[test]
  fn page_rounding() {
    let pz = page_size();

    assert_eq!(page_floor(1), 0);
    assert_eq!(page_floor(pz), pz);
    assert_eq!(page_floor(pz + 1), pz);

    assert_eq!(page_ceil(0), 0);
    assert_eq!(page_ceil(1), pz);
    assert_eq!(page_ceil(pz), pz);
    assert_eq!(page_ceil(pz + 1), pz * 2);
  }
}
