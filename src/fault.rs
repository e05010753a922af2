//! Fault Handler (§4.5).
//!
//! Installs a `SIGSEGV`/`SIGBUS` handler that recognizes accesses to
//! not-yet-resident or write-protected pages of a remote-backed region and
//! materializes or promotes them on demand, mirroring
//! `original_source/interceptor/memcloud_vm.c`'s `page_fault_handler`. The
//! handler itself only identifies the faulting address and delegates to
//! [`service_fault`], which is written to run outside a signal context too
//! so it can be exercised directly in tests.
//!
//! Async-signal-safety: everything [`service_fault`] touches — the table
//! mutex, the remote store call, the raw mapping primitive — is either
//! lock-free or, in the one case that isn't (the table mutex), bounded and
//! never held across a blocking call. This is the one documented exception
//! to "no locking in a signal handler" this crate takes; see SPEC_FULL.md
//! §4.5 for why it's judged safe here (the lock is never held by code that
//! can itself fault or block indefinitely).

use crate::manager::RegionManager;
use crate::table::{PageState, Protection};
use crate::{os, page, Result};
use std::sync::Once;

static INSTALL_ONCE: Once = Once::new();
static mut MANAGER: Option<*const RegionManager> = None;

/// Registers the signal handler. Idempotent; called once from
/// `engine::ensure_bootstrapped`.
///
/// # Safety
/// `manager` must outlive every subsequent fault, which in practice means it
/// must be the process-wide singleton.
pub unsafe fn install(manager: &'static RegionManager) {
  INSTALL_ONCE.call_once(|| {
    MANAGER = Some(manager as *const RegionManager);

    let mut action: libc::sigaction = std::mem::zeroed();
    action.sa_sigaction = handler as usize;
    action.sa_flags = libc::SA_SIGINFO;
    libc::sigemptyset(&mut action.sa_mask);

    libc::sigaction(libc::SIGSEGV, &action, std::ptr::null_mut());
    libc::sigaction(libc::SIGBUS, &action, std::ptr::null_mut());
  });
}

/// What [`service_fault`] did with a faulting address.
#[derive(Debug, PartialEq, Eq)]
pub enum FaultOutcome {
  /// The fault was serviced: either a not-resident page was materialized
  /// from the remote store, or a write-protected resident page was
  /// promoted to resident-dirty and made writable again.
  Handled,
  /// The address does not belong to any active remote-backed region, or
  /// names a page that is already resident-dirty (and so already mapped
  /// read/write — a fault there is not this engine's doing). The caller
  /// must restore the signal's default disposition and re-raise it rather
  /// than treat this as handled (§4.4 step 3, §7 kind 7).
  Unrelated,
}

extern "C" fn handler(signum: libc::c_int, info: *mut libc::siginfo_t, _context: *mut libc::c_void) {
  let addr = unsafe { (*info).si_addr() } as *const u8;

  let manager = unsafe { MANAGER.map(|p| &*p) };
  let outcome = match manager {
    Some(manager) => service_fault(manager, addr),
    None => Ok(FaultOutcome::Unrelated),
  };

  match outcome {
    Ok(FaultOutcome::Handled) => {}
    Ok(FaultOutcome::Unrelated) => restore_default_and_reraise(signum),
    // A fixed remap or protection change failed mid-service: leaving a
    // protected hole in place would poison every future fault against this
    // region, so there is no way to recover (§7 kind 6).
    Err(err) => crate::engine::abort_process(&format!("fatal error servicing fault at {:p}: {}", addr, err)),
  }
}

/// Restores `signum`'s default disposition and re-raises it, matching
/// `original_source/interceptor/memcloud_vm.c`'s `signal(sig, SIG_DFL);
/// raise(sig);` for a fault this engine does not own. Preserves ordinary
/// crash semantics (e.g. a host's own null-pointer bug still terminates the
/// process via the original signal, not `abort`).
fn restore_default_and_reraise(signum: libc::c_int) {
  unsafe {
    let mut action: libc::sigaction = std::mem::zeroed();
    action.sa_sigaction = libc::SIG_DFL;
    libc::sigemptyset(&mut action.sa_mask);
    libc::sigaction(signum, &action, std::ptr::null_mut());
    libc::raise(signum);
  }
}

/// Services a single fault at `addr`.
///
/// If `addr` names a not-resident page of an active remote-backed region,
/// fetches that page's contents from the remote store, maps it read-only
/// and copies the bytes in: a page is resident-clean immediately after
/// fault-in, never resident-dirty (§9's resolved Open Question). Mapping it
/// read-only rather than read/write means a *write* to that same page — be
/// it the very access that caused this fault, or a later one — re-faults
/// once more; that second fault finds the page already resident-and-clean
/// and instead promotes it in place to resident-dirty with a read/write
/// mapping, without touching the remote store again (§4.4 "Dirtying").
///
/// If `addr` names a page that is already resident-dirty, or names no
/// active region at all, returns `Ok(FaultOutcome::Unrelated)` so the
/// caller can restore the signal's default disposition instead of treating
/// the fault as serviced.
///
/// Does not allocate on the Rust heap: the page-sized scratch buffer used
/// to stage the fetched contents lives on the stack.
pub fn service_fault(manager: &RegionManager, addr: *const u8) -> Result<FaultOutcome> {
  let region = match manager.region_containing(addr) {
    Some(region) => region,
    None => return Ok(FaultOutcome::Unrelated),
  };

  let page_size = page::size();
  let offset = addr as usize - region.base as usize;
  let page_index = offset / page_size;
  let page_base = unsafe { region.base.add(page_index * page_size) };

  let state = manager.table().page_state(region.slot, page_index);

  if state.contains(PageState::RESIDENT) {
    if state.contains(PageState::DIRTY) {
      // Already mapped read/write: a fault here is a stale signal for an
      // access a racing thread already serviced, or a genuine protection
      // violation outside this crate's purview. Either way, not ours.
      return Ok(FaultOutcome::Unrelated);
    }

    // Write-protect re-fault: the page's contents are already correct
    // locally, only its protection needs upgrading, so the remote store is
    // not consulted. Promoting in place (`protect`, not `map_fixed`)
    // preserves the page's existing bytes; `map_fixed` would replace the
    // mapping with a fresh, zeroed one.
    unsafe { os::protect(page_base, page_size, Protection::READ_WRITE)? };
    manager.table().set_page_state(region.slot, page_index, PageState::RESIDENT | PageState::DIRTY);
    return Ok(FaultOutcome::Handled);
  }

  unsafe { os::map_fixed(page_base, page_size, Protection::READ_WRITE)? };

  let mut staging = [0u8; 4096];
  debug_assert!(page_size <= staging.len(), "page size exceeds fault-handler staging buffer");
  let staging = &mut staging[..page_size];
  let bytes_read = manager.store().vm_fetch(region.remote_id, page_index, staging)?;
  if bytes_read < staging.len() {
    // A short read means the store has nothing for the tail of the page;
    // a page is conceptually zero until something has been written there.
    staging[bytes_read..].iter_mut().for_each(|b| *b = 0);
  }

  unsafe { std::ptr::copy_nonoverlapping(staging.as_ptr(), page_base, page_size) };

  // Downgrade to read-only now that the contents are in place, so that a
  // write (including the one that may have caused this very fault) is
  // caught by the branch above instead of silently going unnoticed.
  unsafe { os::protect(page_base, page_size, Protection::READ)? };

  manager.table().set_page_state(region.slot, page_index, PageState::RESIDENT);

  Ok(FaultOutcome::Handled)
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
  fn fault_outside_any_region_is_unrelated() {
    let mgr = manager();
    let result = service_fault(&mgr, 0x1 as *const u8);
    assert!(matches!(result, Ok(FaultOutcome::Unrelated)));
  }

  #[test]
  fn fault_materializes_remote_contents_resident_clean() {
    let mgr = manager();
    let region = mgr.create(page::size()).unwrap();
    let page_data = vec![0xABu8; page::size()];
    mgr.store().vm_store(region.remote_id, 0, &page_data).unwrap();

    let outcome = service_fault(&mgr, region.base).unwrap();
    assert_eq!(outcome, FaultOutcome::Handled);

    let read_back = unsafe { std::slice::from_raw_parts(region.base, page::size()) };
    assert_eq!(read_back, &page_data[..]);

    let state = mgr.table().page_state(region.slot, 0);
    assert!(state.contains(PageState::RESIDENT));
    assert!(!state.contains(PageState::DIRTY));
  }

  /// The real analogue of this second call is the write-protect re-fault
  /// that the OS raises when a write lands on the read-only page the first
  /// fault just mapped — simulated here by invoking `service_fault` again
  /// against the same address.
  #[test]
  fn second_fault_on_resident_clean_page_promotes_to_dirty() {
    let mgr = manager();
    let region = mgr.create(page::size()).unwrap();

    service_fault(&mgr, region.base).unwrap();
    let outcome = service_fault(&mgr, region.base).unwrap();
    assert_eq!(outcome, FaultOutcome::Handled);

    let state = mgr.table().page_state(region.slot, 0);
    assert!(state.contains(PageState::RESIDENT));
    assert!(state.contains(PageState::DIRTY));

    // Now read/write: writing through it must not fault again in this
    // test process (it would, if still mapped read-only).
    unsafe { region.base.write(0x42) };
    assert_eq!(unsafe { region.base.read() }, 0x42);
  }

  #[test]
  fn fault_on_already_dirty_page_is_unrelated() {
    let mgr = manager();
    let region = mgr.create(page::size()).unwrap();
    service_fault(&mgr, region.base).unwrap();
    service_fault(&mgr, region.base).unwrap();

    let result = service_fault(&mgr, region.base);
    assert!(matches!(result, Ok(FaultOutcome::Unrelated)));
  }

  /// A never-written page should fault in as all zero, matching §7's
  /// "short read from the store is zero-fill, not an error" handling —
  /// exercised here against the real `MockRemoteStore`, whose `vm_fetch`
  /// reports zero bytes read for a page nothing has ever stored.
  #[test]
  fn fault_on_never_written_page_zero_fills() {
    let mgr = manager();
    let region = mgr.create(page::size()).unwrap();

    service_fault(&mgr, region.base).unwrap();

    let read_back = unsafe { std::slice::from_raw_parts(region.base, page::size()) };
    assert!(read_back.iter().all(|&b| b == 0));
  }
}
