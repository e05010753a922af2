//! Region Table (§3, §4.2).
//!
//! Fixed-capacity registry of live remote-backed regions, acquired from the
//! raw mapping primitive in one burst at bootstrap so that no later lookup,
//! insert or release needs to touch the Rust heap (§4.2's "eliminates any
//! allocation on the critical paging paths").
//!
//! `PageState` is generalized from the teacher's `Protection` bitflags
//! (`protect.rs`'s `bitflags! { pub struct Protection: usize { ... } }`) —
//! same macro, same "small bitset describing one memory concept" shape,
//! applied to per-page residency instead of per-region access rights.

use crate::os;
use crate::{Error, Result};
use std::sync::Mutex;

pub use crate::protection::Protection;

/// Maximum number of simultaneously active remote-backed regions.
pub const MAX_REGIONS: usize = 1024;

/// Bytes of page-state storage reserved per slot. One byte per page, so a
/// slot can describe a region of up to `PAGE_STATE_SLOT_BYTES * PAGESIZE`
/// bytes (with a 4 KiB page size, 4 GiB) — see SPEC_FULL.md §3.
pub const PAGE_STATE_SLOT_BYTES: usize = 1024 * 1024;

bitflags::bitflags! {
  /// Per-page residency state (§3 data model).
  pub struct PageState: u8 {
    /// The page has local backing (mapped read/write).
    const RESIDENT = 1 << 0;
    /// The page's local contents diverge from the remote copy. Only valid
    /// together with `RESIDENT` (§3 invariant: "a dirty page is always
    /// resident").
    const DIRTY = 1 << 1;
  }
}

/// A snapshot of one table slot's identity, copied out while holding the
/// table mutex so callers (notably the fault handler) can drop the lock
/// before doing anything that might block or fault.
#[derive(Debug, Clone, Copy)]
pub struct RegionInfo {
  /// Table slot index, passed back to `set_page_state`/`release`.
  pub slot: usize,
  /// Page-aligned base address of the region.
  pub base: *mut u8,
  /// Size in bytes of the region.
  pub size: usize,
  /// Opaque identifier assigned by the remote store.
  pub remote_id: u64,
}

unsafe impl Send for RegionInfo {}

struct Slot {
  base: usize,
  size: usize,
  remote_id: u64,
  active: bool,
  /// Offset of this slot's page-state bytes within the shared pool.
  page_state_offset: usize,
}

struct Inner {
  slots: Vec<Slot>,
  /// Raw-mapped, never reallocated: `MAX_REGIONS * PAGE_STATE_SLOT_BYTES`
  /// bytes, one `PAGE_STATE_SLOT_BYTES`-byte stripe per slot.
  page_state_pool: *mut u8,
}

unsafe impl Send for Inner {}

/// The process-wide region table.
pub struct RegionTable {
  inner: Mutex<Inner>,
}

impl RegionTable {
  /// Acquires the table's backing storage from the raw mapping primitive.
  /// Called once, from `engine::ensure_bootstrapped`.
  pub fn new() -> Result<Self> {
    let pool_size = MAX_REGIONS * PAGE_STATE_SLOT_BYTES;
    let page_state_pool = os::reserve(pool_size, Protection::READ_WRITE)?;

    let mut slots = Vec::with_capacity(MAX_REGIONS);
    for i in 0..MAX_REGIONS {
      slots.push(Slot {
        base: 0,
        size: 0,
        remote_id: 0,
        active: false,
        page_state_offset: i * PAGE_STATE_SLOT_BYTES,
      });
    }

    Ok(RegionTable {
      inner: Mutex::new(Inner { slots, page_state_pool }),
    })
  }

  fn page_state_ptr(inner: &Inner, slot: &Slot) -> *mut u8 {
    unsafe { inner.page_state_pool.add(slot.page_state_offset) }
  }

  /// Allocates a free slot for a region of `size` bytes at `base`, owned by
  /// `remote_id`. All pages start not-resident and clean.
  pub fn insert(&self, base: *mut u8, size: usize, remote_id: u64) -> Result<RegionInfo> {
    let page_count = crate::page::count(size);
    if page_count > PAGE_STATE_SLOT_BYTES {
      return Err(Error::TableExhausted(self.active_count()));
    }

    let mut inner = self.inner.lock().unwrap();
    let active_count = inner.slots.iter().filter(|s| s.active).count();

    let index = inner
      .slots
      .iter()
      .position(|s| !s.active)
      .ok_or(Error::TableExhausted(active_count))?;

    let page_state_ptr = {
      let slot = &inner.slots[index];
      Self::page_state_ptr(&inner, slot)
    };
    unsafe { std::ptr::write_bytes(page_state_ptr, 0, page_count) };

    let slot = &mut inner.slots[index];
    slot.base = base as usize;
    slot.size = size;
    slot.remote_id = remote_id;
    slot.active = true;

    Ok(RegionInfo {
      slot: index,
      base,
      size,
      remote_id,
    })
  }

  /// Finds the slot whose base address is exactly `addr`.
  pub fn lookup_exact(&self, addr: *const u8) -> Option<RegionInfo> {
    let inner = self.inner.lock().unwrap();
    let addr = addr as usize;

    inner
      .slots
      .iter()
      .enumerate()
      .find(|(_, s)| s.active && s.base == addr)
      .map(|(index, s)| RegionInfo {
        slot: index,
        base: s.base as *mut u8,
        size: s.size,
        remote_id: s.remote_id,
      })
  }

  /// Finds the slot whose range `[base, base + size)` contains `addr`.
  pub fn lookup_containing(&self, addr: *const u8) -> Option<RegionInfo> {
    let inner = self.inner.lock().unwrap();
    let addr = addr as usize;

    inner
      .slots
      .iter()
      .enumerate()
      .find(|(_, s)| s.active && addr >= s.base && addr < s.base + s.size)
      .map(|(index, s)| RegionInfo {
        slot: index,
        base: s.base as *mut u8,
        size: s.size,
        remote_id: s.remote_id,
      })
  }

  /// Clears a slot. The caller is responsible for unmapping the address
  /// range and releasing the remote identifier — this only frees the table
  /// bookkeeping, atomically with respect to other table operations.
  pub fn release(&self, slot: usize) {
    let mut inner = self.inner.lock().unwrap();
    inner.slots[slot].active = false;
    inner.slots[slot].base = 0;
    inner.slots[slot].size = 0;
    inner.slots[slot].remote_id = 0;
  }

  /// Reads a single page's state.
  pub fn page_state(&self, slot: usize, page_index: usize) -> PageState {
    let inner = self.inner.lock().unwrap();
    let ptr = Self::page_state_ptr(&inner, &inner.slots[slot]);
    PageState::from_bits_truncate(unsafe { *ptr.add(page_index) })
  }

  /// Overwrites a single page's state.
  pub fn set_page_state(&self, slot: usize, page_index: usize, state: PageState) {
    let inner = self.inner.lock().unwrap();
    let ptr = Self::page_state_ptr(&inner, &inner.slots[slot]);
    unsafe { *ptr.add(page_index) = state.bits() };
  }

  /// Invokes `f` once per resident-dirty page across every active region,
  /// re-acquiring the table mutex between pages so the critical section per
  /// call stays bounded (§4.5). `f` receives the region info and page index
  /// and is called with the mutex **not** held.
  pub fn for_each_dirty_page(&self, mut f: impl FnMut(RegionInfo, usize)) {
    let slot_count = {
      let inner = self.inner.lock().unwrap();
      inner.slots.len()
    };

    for slot in 0..slot_count {
      let (info, page_count) = {
        let inner = self.inner.lock().unwrap();
        let s = &inner.slots[slot];
        if !s.active {
          continue;
        }
        (
          RegionInfo {
            slot,
            base: s.base as *mut u8,
            size: s.size,
            remote_id: s.remote_id,
          },
          crate::page::count(s.size),
        )
      };

      for page_index in 0..page_count {
        let dirty = self.page_state(slot, page_index).contains(PageState::DIRTY);
        if dirty {
          f(info, page_index);
        }
      }
    }
  }

  fn active_count(&self) -> usize {
    self.inner.lock().unwrap().slots.iter().filter(|s| s.active).count()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn table() -> RegionTable {
    RegionTable::new().expect("table")
  }

  #[test]
  fn insert_lookup_release_roundtrip() {
    let t = table();
    let base = 0x1000 as *mut u8;
    let info = t.insert(base, 8192, 42).expect("insert");
    assert_eq!(info.remote_id, 42);

    let found = t.lookup_exact(base).expect("lookup_exact");
    assert_eq!(found.remote_id, 42);
    assert_eq!(found.size, 8192);

    let contained = t.lookup_containing((base as usize + 100) as *const u8).expect("contains");
    assert_eq!(contained.slot, found.slot);

    t.release(info.slot);
    assert!(t.lookup_exact(base).is_none());
  }

  #[test]
  fn fresh_region_pages_start_not_resident_and_clean() {
    let t = table();
    let info = t.insert(0x2000 as *mut u8, 8192, 1).expect("insert");
    assert_eq!(t.page_state(info.slot, 0), PageState::empty());
    assert_eq!(t.page_state(info.slot, 1), PageState::empty());
  }

  #[test]
  fn set_page_state_is_observable() {
    let t = table();
    let info = t.insert(0x3000 as *mut u8, 4096, 1).expect("insert");
    t.set_page_state(info.slot, 0, PageState::RESIDENT | PageState::DIRTY);
    assert!(t.page_state(info.slot, 0).contains(PageState::DIRTY));
    assert!(t.page_state(info.slot, 0).contains(PageState::RESIDENT));
  }

  #[test]
  fn table_exhaustion_is_reported() {
    let t = table();
    for i in 0..MAX_REGIONS {
      t.insert((0x10000 + i * 4096) as *mut u8, 4096, i as u64).expect("insert");
    }
    let result = t.insert(0x99999 as *mut u8, 4096, 9999);
    assert!(matches!(result, Err(Error::TableExhausted(n)) if n == MAX_REGIONS));
  }

  #[test]
  fn for_each_dirty_page_visits_only_dirty_pages_and_releases_mutex() {
    let t = table();
    let info = t.insert(0x4000 as *mut u8, 3 * 4096, 7).expect("insert");
    t.set_page_state(info.slot, 1, PageState::RESIDENT | PageState::DIRTY);

    let mut visited = Vec::new();
    t.for_each_dirty_page(|region, page_index| {
      visited.push((region.slot, page_index));
      // Reentrant table access from inside the callback proves the mutex
      // isn't held across the call.
      let _ = t.lookup_exact(region.base);
    });

    assert_eq!(visited, vec![(info.slot, 1)]);
  }
}
