//! Region Manager (§4.4).
//!
//! Sits between the allocator surface and the region table / remote store:
//! decides how a remote-backed allocation is laid out locally, and keeps the
//! table, the address space and the remote store's bookkeeping in sync for
//! create, grow/shrink and destroy.

use crate::remote::RemoteStore;
use crate::table::{Protection, RegionInfo, RegionTable};
use crate::{os, page, Error, Result};
use std::sync::Arc;

/// Coordinates region lifecycle on top of a [`RegionTable`] and a
/// [`RemoteStore`].
pub struct RegionManager {
  table: Arc<RegionTable>,
  store: Arc<dyn RemoteStore>,
}

impl RegionManager {
  pub fn new(table: Arc<RegionTable>, store: Arc<dyn RemoteStore>) -> Self {
    RegionManager { table, store }
  }

  /// Admits `size` bytes with the remote store, reserves a matching
  /// no-access address range locally (materialized lazily by the fault
  /// handler) and records the region in the table.
  ///
  /// On remote admission failure the reservation is torn down before the
  /// error is returned, so a failed `create` never leaks address space.
  pub fn create(&self, size: usize) -> Result<RegionInfo> {
    let size = page::ceil(size as *const ()) as usize;
    let remote_id = self.store.vm_alloc(size)?;

    let base = match os::reserve(size, Protection::NONE) {
      Ok(base) => base,
      Err(err) => {
        let _ = self.store.vm_free(remote_id);
        return Err(err);
      }
    };

    match self.table.insert(base, size, remote_id) {
      Ok(info) => Ok(info),
      Err(err) => {
        unsafe { os::unmap(base, size).ok() };
        let _ = self.store.vm_free(remote_id);
        Err(err)
      }
    }
  }

  /// Grows or shrinks a region in place where possible, otherwise allocates
  /// a fresh one and copies the resident prefix across.
  ///
  /// Mirrors the realloc contract every hook must satisfy: existing
  /// contents up to `min(old_size, new_size)` are preserved, the returned
  /// region is a distinct `RegionInfo` when relocation was needed.
  pub fn realloc(&self, old: RegionInfo, new_size: usize) -> Result<RegionInfo> {
    let new_size = page::ceil(new_size as *const ()) as usize;
    if new_size == old.size {
      return Ok(old);
    }

    let new_region = self.create(new_size)?;
    let copy_len = old.size.min(new_size);
    let copy_pages = page::count(copy_len);

    let mut buf = vec![0u8; page::size()];
    for page_index in 0..copy_pages {
      let state = self.table.page_state(old.slot, page_index);
      if state.contains(crate::table::PageState::RESIDENT) {
        let src = unsafe { old.base.add(page_index * page::size()) };
        let len = (copy_len - page_index * page::size()).min(page::size());
        unsafe { std::ptr::copy_nonoverlapping(src, buf.as_mut_ptr(), len) };
      } else {
        let bytes_read = self.store.vm_fetch(old.remote_id, page_index, &mut buf)?;
        if bytes_read < buf.len() {
          buf[bytes_read..].iter_mut().for_each(|b| *b = 0);
        }
      }
      self.store.vm_store(new_region.remote_id, page_index, &buf)?;
    }

    self.destroy(old)?;
    Ok(new_region)
  }

  /// Releases a region: unmaps its address range, frees it with the remote
  /// store and clears the table slot, in that order so a crash mid-teardown
  /// never leaves a table entry pointing at unmapped memory.
  pub fn destroy(&self, region: RegionInfo) -> Result<()> {
    unsafe { os::unmap(region.base, region.size)? };
    self.store.vm_free(region.remote_id)?;
    self.table.release(region.slot);
    Ok(())
  }

  /// Looks up the region, if any, that owns `ptr` as its base address.
  /// Used by the allocator surface to recognize a remote-backed pointer
  /// passed back into `realloc`/`free`.
  pub fn region_for(&self, ptr: *const u8) -> Option<RegionInfo> {
    self.table.lookup_exact(ptr)
  }

  /// Looks up the region, if any, containing `addr`. Used by the fault
  /// handler to decide whether a faulting address belongs to this engine.
  pub fn region_containing(&self, addr: *const u8) -> Option<RegionInfo> {
    self.table.lookup_containing(addr)
  }

  pub fn table(&self) -> &Arc<RegionTable> {
    &self.table
  }

  pub fn store(&self) -> &Arc<dyn RemoteStore> {
    &self.store
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::remote::mock::MockRemoteStore;

  fn manager() -> RegionManager {
    let table = Arc::new(RegionTable::new().unwrap());
    let store: Arc<dyn RemoteStore> = Arc::new(MockRemoteStore::new(page::size()));
    RegionManager::new(table, store)
  }

  #[test]
  fn create_then_destroy_releases_everything() {
    let mgr = manager();
    let region = mgr.create(16 * 1024).unwrap();
    assert!(mgr.region_for(region.base).is_some());
    mgr.destroy(region).unwrap();
    assert!(mgr.region_for(region.base).is_none());
  }

  #[test]
  fn create_size_is_rounded_to_whole_pages() {
    let mgr = manager();
    let region = mgr.create(1).unwrap();
    assert_eq!(region.size, page::size());
  }

  #[test]
  fn failed_remote_admit_leaks_nothing() {
    let table = Arc::new(RegionTable::new().unwrap());
    let mock = Arc::new(MockRemoteStore::new(page::size()));
    mock.fail_alloc.store(true, std::sync::atomic::Ordering::SeqCst);
    let store: Arc<dyn RemoteStore> = mock;
    let mgr = RegionManager::new(table, store);

    let result = mgr.create(4096);
    assert!(result.is_err());
  }

  #[test]
  fn realloc_preserves_fetched_contents() {
    let mgr = manager();
    let region = mgr.create(4096).unwrap();
    let page_data = vec![42u8; page::size()];
    mgr.store().vm_store(region.remote_id, 0, &page_data).unwrap();

    let grown = mgr.realloc(region, 3 * page::size()).unwrap();
    assert_eq!(grown.size, 3 * page::size());

    let mut buf = vec![0u8; page::size()];
    mgr.store().vm_fetch(grown.remote_id, 0, &mut buf).unwrap();
    assert_eq!(buf, page_data);
  }

  #[test]
  fn realloc_to_same_size_is_a_no_op() {
    let mgr = manager();
    let region = mgr.create(4096).unwrap();
    let same = mgr.realloc(region, 4096).unwrap();
    assert_eq!(same.slot, region.slot);
    mgr.destroy(same).unwrap();
  }
}
