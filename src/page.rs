//! Page related functions.

use crate::os;
use std::sync::Once;

/// Returns the operating system's page size.
///
/// This function uses an internally cached page size, and can be called
/// repeatedly without incurring a significant performance penalty.
///
/// # Examples
///
/// ```
/// # use vmproxy::page;
/// let size = page::size(); // Most likely 4096
/// ```
#[inline]
pub fn size() -> usize {
  static INIT: Once = Once::new();
  static mut PAGE_SIZE: usize = 0;

  unsafe {
    INIT.call_once(|| PAGE_SIZE = os::page_size());
    PAGE_SIZE
  }
}

/// Rounds an address down to its closest page boundary.
///
/// # Examples
///
/// ```
/// # use vmproxy::page;
/// let unaligned_pointer = (page::size() + 1) as *const ();
///
/// assert_eq!(page::floor(unaligned_pointer), page::size() as *const _);
/// ```
#[inline]
pub fn floor<T>(address: *const T) -> *const T {
  (address as usize & !(size() - 1)) as *const T
}

/// Rounds an address up to its closest page boundary.
///
/// # Examples
///
/// ```
/// # use vmproxy::page;
/// let unaligned_pointer = (page::size() - 1) as *const ();
///
/// assert_eq!(page::ceil(unaligned_pointer), page::size() as *const _);
/// ```
#[inline]
pub fn ceil<T>(address: *const T) -> *const T {
  match (address as usize).checked_add(size()) {
    Some(offset) => ((offset - 1) & !(size() - 1)) as *const T,
    None => floor(address),
  }
}

/// Returns the number of whole pages needed to cover `bytes`, rounding up.
///
/// The final page may be partial, per the data model's size invariant; this
/// still counts as one full page slot.
#[inline]
pub fn count(bytes: usize) -> usize {
  let pz = size();
  (bytes + pz - 1) / pz
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn page_size_is_reasonable() {
    let pz = size();

    assert!(pz > 0);
    assert_eq!(pz % 2, 0);
    assert_eq!(pz, size());
  }

  #[test]
  fn page_rounding_works() {
    let pz = size();
    let point = 1 as *const ();

    assert_eq!(floor(point) as usize, 0);
    assert_eq!(floor(pz as *const ()) as usize, pz);
    assert_eq!(floor(usize::max_value() as *const ()) as usize % pz, 0);

    assert_eq!(ceil(point) as usize, pz);
    assert_eq!(ceil(pz as *const ()) as usize, pz);
    assert_eq!(ceil(usize::max_value() as *const ()) as usize % pz, 0);
  }

  #[test]
  fn count_rounds_up_to_whole_pages() {
    let pz = size();

    assert_eq!(count(0), 0);
    assert_eq!(count(1), 1);
    assert_eq!(count(pz), 1);
    assert_eq!(count(pz + 1), 2);
    assert_eq!(count(pz * 3), 3);
  }
}
