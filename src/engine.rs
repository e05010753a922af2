//! Bootstrap and the process-wide engine singleton (§4.8).
//!
//! Every hook's prologue calls [`ensure_bootstrapped`] before doing
//! anything else, exactly like `original_source/interceptor/memcloud_vm.c`'s
//! `lazy_init()` call at the top of each intercepted function. There is no
//! separate constructor: the first call wins, resolves the real allocator
//! symbols, reads configuration, stands up the region table and remote
//! client and installs the fault handler, and every later call is a single
//! already-initialized check.

use crate::config::Config;
use crate::manager::RegionManager;
use crate::remote::{RemoteStore, SocketStore};
use crate::table::RegionTable;
use crate::writeback::Worker;
use log::error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};

static BOOTSTRAP_ONCE: Once = Once::new();
static BOOTSTRAPPED: AtomicBool = AtomicBool::new(false);

static mut ENGINE: Option<Engine> = None;

/// The process-wide collaborators: config, region table, remote client,
/// region manager. The writeback worker is owned here too so it stops
/// being reachable (and therefore stops ticking) only when the process
/// exits.
pub struct Engine {
  pub config: Config,
  pub manager: Arc<RegionManager>,
  _writeback: Worker,
}

/// Ensures the engine is initialized, resolving symbols, reading
/// configuration, connecting to the remote store and installing the fault
/// handler on first call. Safe to call repeatedly and from any thread.
///
/// A failure to reach the remote store, reserve the table's backing memory,
/// or install the fault handler is unrecoverable this early — there is no
/// degraded mode a hook could fall back to — so those paths abort the
/// process rather than return an error (§9 "Bootstrap failure").
pub fn ensure_bootstrapped() -> &'static Engine {
  crate::symbols::ensure_resolved();

  BOOTSTRAP_ONCE.call_once(|| {
    let config = Config::from_env();

    let table = match RegionTable::new() {
      Ok(table) => Arc::new(table),
      Err(err) => abort_process(&format!("failed to reserve region table: {}", err)),
    };

    let store: Arc<dyn RemoteStore> = match SocketStore::connect(&config.socket_path) {
      Ok(store) => Arc::new(store),
      Err(err) => abort_process(&format!("failed to reach remote store at {}: {}", config.socket_path, err)),
    };

    let manager = Arc::new(RegionManager::new(table, store));
    let writeback = Worker::spawn(Arc::clone(&manager));

    unsafe {
      ENGINE = Some(Engine {
        config,
        manager: Arc::clone(&manager),
        _writeback: writeback,
      });

      #[cfg(unix)]
      {
        let engine_ref: &'static Engine = ENGINE.as_ref().unwrap();
        let manager_ref: &'static RegionManager = &engine_ref.manager;
        crate::fault::install(manager_ref);
      }
    }

    BOOTSTRAPPED.store(true, Ordering::SeqCst);
  });

  unsafe { ENGINE.as_ref().expect("bootstrap completed without setting ENGINE") }
}

/// Returns the engine if bootstrap has already completed, without
/// triggering it. Used by code paths (like tests) that want to observe
/// whether bootstrap has happened elsewhere.
pub fn bootstrapped() -> bool {
  BOOTSTRAPPED.load(Ordering::SeqCst)
}

/// Logs `message` and aborts the process immediately.
///
/// # Panics / Aborts
/// Always aborts; never returns. Used for the handful of failure modes this
/// crate has decided are unrecoverable (bootstrap failure, an unhandled
/// fault, a fixed remap that fails mid-fault-service).
pub fn abort_process(message: &str) -> ! {
  error!("vmproxy: {}", message);
  std::process::abort()
}
