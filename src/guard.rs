//! The per-thread recursion guard (§4.6, §5, §9 "Signal-handler re-entry").
//!
//! Every hook body and the fault handler run with this guard set for the
//! duration of their work. Any allocation the paging machinery itself makes
//! (symbol resolution, mutex bookkeeping, the remote client's own scratch
//! space) happens while the guard is already set, so it is redirected to
//! [`symbols::internal_malloc`](crate::symbols) and friends instead of
//! re-entering the hook dispatch — without this, a single call to
//! `Vec::push` inside the region manager would recurse into `malloc`
//! forever.

use std::cell::Cell;

thread_local! {
  static GUARD: Cell<bool> = Cell::new(false);
}

/// Returns whether the calling thread is currently inside hook dispatch.
#[inline]
pub fn is_set() -> bool {
  GUARD.with(Cell::get)
}

/// RAII scope that sets the guard on construction and clears it on drop,
/// even if the guarded body panics.
pub struct GuardScope {
  _private: (),
}

impl GuardScope {
  /// Sets the guard for the current thread.
  ///
  /// # Panics
  ///
  /// Panics if the guard is already set on this thread — callers must check
  /// [`is_set`] first, per the hook prologue in §4.6.
  pub fn enter() -> Self {
    GUARD.with(|g| {
      debug_assert!(!g.get(), "recursion guard entered while already set");
      g.set(true);
    });
    GuardScope { _private: () }
  }
}

impl Drop for GuardScope {
  fn drop(&mut self) {
    GUARD.with(|g| g.set(false));
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn guard_is_unset_initially() {
    assert!(!is_set());
  }

  #[test]
  fn guard_scope_sets_and_clears() {
    assert!(!is_set());
    {
      let _scope = GuardScope::enter();
      assert!(is_set());
    }
    assert!(!is_set());
  }

  #[test]
  fn guard_is_cleared_even_on_panic() {
    let result = std::panic::catch_unwind(|| {
      let _scope = GuardScope::enter();
      panic!("boom");
    });
    assert!(result.is_err());
    assert!(!is_set());
  }
}
