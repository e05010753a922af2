//! Environment-derived configuration (§6).
//!
//! Read once, at bootstrap, and cached in the engine singleton. A changing
//! threshold mid-process would let a pointer's remote-backed-ness depend on
//! when it was allocated relative to an environment mutation, which nothing
//! else in this crate accounts for — so `Config::from_env` is only ever
//! called once, by `engine::ensure_bootstrapped`.

use std::env;

const THRESHOLD_VAR: &str = "REMOTE_ALLOC_THRESHOLD_MB";
const SOCKET_VAR: &str = "REMOTE_SOCKET";
const DEFAULT_THRESHOLD_MB: usize = 8;
const DEFAULT_SOCKET_PATH: &str = "/tmp/vmproxy.sock";

/// Process-wide configuration, fixed for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct Config {
  /// Size in bytes at or above which an allocation is remote-backed.
  pub threshold: usize,
  /// Path of the local socket the remote store client connects to.
  pub socket_path: String,
}

impl Config {
  /// Reads `REMOTE_ALLOC_THRESHOLD_MB` and `REMOTE_SOCKET`, falling back to
  /// the documented defaults for anything unset or unparsable.
  pub fn from_env() -> Self {
    let threshold_mb = env::var(THRESHOLD_VAR)
      .ok()
      .and_then(|value| value.parse::<usize>().ok())
      .unwrap_or(DEFAULT_THRESHOLD_MB);

    let socket_path = env::var(SOCKET_VAR).unwrap_or_else(|_| DEFAULT_SOCKET_PATH.to_string());

    Config {
      threshold: threshold_mb * 1024 * 1024,
      socket_path,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  // `std::env` is process-global, so these run as one test to avoid racing
  // another test's set_var/remove_var on the same keys.
  #[test]
  fn config_from_env() {
    env::remove_var(THRESHOLD_VAR);
    env::remove_var(SOCKET_VAR);
    let config = Config::from_env();
    assert_eq!(config.threshold, DEFAULT_THRESHOLD_MB * 1024 * 1024);
    assert_eq!(config.socket_path, DEFAULT_SOCKET_PATH);

    env::set_var(THRESHOLD_VAR, "16");
    let config = Config::from_env();
    assert_eq!(config.threshold, 16 * 1024 * 1024);

    env::set_var(THRESHOLD_VAR, "not-a-number");
    let config = Config::from_env();
    assert_eq!(config.threshold, DEFAULT_THRESHOLD_MB * 1024 * 1024);
    env::remove_var(THRESHOLD_VAR);

    env::set_var(SOCKET_VAR, "/tmp/custom.sock");
    let config = Config::from_env();
    assert_eq!(config.socket_path, "/tmp/custom.sock");
    env::remove_var(SOCKET_VAR);
  }
}
