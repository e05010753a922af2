//! Writeback Worker (§4.5 fault handler's counterpart, §4.7).
//!
//! A background thread that periodically walks the region table for
//! resident-dirty pages and flushes them to the remote store, mirroring
//! `original_source/interceptor/memcloud_vm.c`'s `sync_thread` and its
//! `usleep(100000)` tick.

use crate::manager::RegionManager;
use crate::page;
use crate::table::{PageState, Protection};
use log::warn;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const TICK: Duration = Duration::from_millis(100);

/// Handle to the background writeback thread. Dropping it does not stop the
/// thread; call [`Worker::stop`] explicitly (the engine never does, since
/// the worker is meant to run for the lifetime of the process, but tests
/// need to tear theirs down).
pub struct Worker {
  running: Arc<AtomicBool>,
  handle: Option<JoinHandle<()>>,
}

impl Worker {
  /// Spawns the worker thread against `manager`.
  pub fn spawn(manager: Arc<RegionManager>) -> Self {
    let running = Arc::new(AtomicBool::new(true));
    let running_thread = Arc::clone(&running);

    let handle = thread::Builder::new()
      .name("vmproxy-writeback".into())
      .spawn(move || {
        while running_thread.load(Ordering::SeqCst) {
          thread::sleep(TICK);
          flush_dirty_pages(&manager);
        }
      })
      .expect("spawning the writeback thread");

    Worker {
      running,
      handle: Some(handle),
    }
  }

  /// Signals the worker to stop after its current tick and joins it.
  pub fn stop(mut self) {
    self.running.store(false, Ordering::SeqCst);
    if let Some(handle) = self.handle.take() {
      let _ = handle.join();
    }
  }
}

/// Scans every active region for resident-dirty pages and writes each back,
/// clearing the dirty bit and write-protecting the page on success. A page
/// whose write fails stays dirty and read/write, and is retried on the next
/// tick; the failure is logged rather than propagated, since there is no
/// caller to propagate it to.
///
/// Write-protecting a page after a successful flush (§4.4 "Dirtying") is
/// what makes the next write to it observable at all: without it the page
/// would stay mapped read/write forever and a second write would never
/// re-fault, so the table would keep reporting it clean. If the protect
/// call itself fails, the page is logged and left alone: it is already
/// correctly flushed, just not re-armed, so the worst case is an extra
/// redundant flush next tick once something else touches the page.
pub fn flush_dirty_pages(manager: &RegionManager) {
  let page_size = page::size();
  manager.table().for_each_dirty_page(|region, page_index| {
    let page_base = unsafe { region.base.add(page_index * page_size) };
    let data = unsafe { std::slice::from_raw_parts(page_base, page_size) };

    match manager.store().vm_store(region.remote_id, page_index, data) {
      Ok(()) => {
        manager.table().set_page_state(region.slot, page_index, PageState::RESIDENT);
        if let Err(err) = unsafe { crate::os::protect(page_base, page_size, Protection::READ) } {
          warn!("re-protecting region slot {} page {} after writeback failed: {}", region.slot, page_index, err);
        }
      }
      Err(err) => warn!("writeback of region slot {} page {} failed: {}", region.slot, page_index, err),
    }
  });
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::remote::mock::MockRemoteStore;
  use crate::remote::RemoteStore;
  use crate::table::RegionTable;
  use std::sync::Arc;

  fn manager() -> RegionManager {
    let table = Arc::new(RegionTable::new().unwrap());
    let store: Arc<dyn RemoteStore> = Arc::new(MockRemoteStore::new(page::size()));
    RegionManager::new(table, store)
  }

  #[test]
  fn flush_writes_dirty_pages_and_clears_the_bit() {
    let mgr = manager();
    let region = mgr.create(page::size()).unwrap();

    // Fault-in maps the page read-only; a second fault simulates the write
    // re-fault that promotes it to resident-dirty and read/write, the same
    // way a real write through the mapping would.
    crate::fault::service_fault(&mgr, region.base).unwrap();
    crate::fault::service_fault(&mgr, region.base).unwrap();

    unsafe {
      std::ptr::write_bytes(region.base, 0x5A, page::size());
    }

    flush_dirty_pages(&mgr);

    let state = mgr.table().page_state(region.slot, 0);
    assert!(!state.contains(PageState::DIRTY));

    let mut stored = vec![0u8; page::size()];
    mgr.store().vm_fetch(region.remote_id, 0, &mut stored).unwrap();
    assert!(stored.iter().all(|&b| b == 0x5A));
  }

  #[test]
  fn flush_leaves_clean_pages_untouched() {
    let mgr = manager();
    let region = mgr.create(page::size()).unwrap();
    crate::fault::service_fault(&mgr, region.base).unwrap();

    flush_dirty_pages(&mgr);

    let mut stored = vec![0xffu8; page::size()];
    mgr.store().vm_fetch(region.remote_id, 0, &mut stored).unwrap();
    assert!(stored.iter().all(|&b| b == 0));
  }

  #[test]
  fn worker_spawns_and_stops_cleanly() {
    let mgr = Arc::new(manager());
    let worker = Worker::spawn(Arc::clone(&mgr));
    thread::sleep(Duration::from_millis(10));
    worker.stop();
  }
}
