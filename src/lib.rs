#![deny(
  clippy::all,
  clippy::ptr_as_ptr,
  clippy::print_stdout,
  nonstandard_style,
  unused,
  warnings
)]
//! A transparent remote-memory paging layer.
//!
//! This crate interposes the process-wide allocator (`malloc`/`calloc`/
//! `realloc`/`free`) and routes allocations at or above a configurable
//! threshold to a remote memory store reached over a local socket, instead
//! of backing them with ordinary heap memory. Pages of a remote-backed
//! region are not resident until first touched: a `SIGSEGV`/`SIGBUS`
//! handler fetches and maps each page lazily, and a background worker
//! flushes pages that have been written back to the store.
//!
//! Everything below the allocator surface is size-routing and bookkeeping;
//! callers never see a remote-backed pointer behave differently from an
//! ordinary one, other than its latency on first touch.
//!
//! # Installation
//!
//! On Linux, BSD and illumos this crate is meant to be built as a
//! `cdylib` and loaded with `LD_PRELOAD`:
//!
//! ```sh
//! REMOTE_ALLOC_THRESHOLD_MB=8 REMOTE_SOCKET=/tmp/vmproxy.sock \
//!   LD_PRELOAD=./libvmproxy.so ./your_program
//! ```
//!
//! On macOS the same shared object is loaded with `DYLD_INSERT_LIBRARIES`;
//! symbol replacement happens through a Mach-O interpose table rather than
//! same-named exports (see [`os::macos_interpose`]).
//!
//! Allocator interposition is not implemented on Windows; [`os`] still
//! exposes the raw mapping primitives there for anything built directly
//! against this crate as a library.

#[macro_use]
extern crate lazy_static;

pub use crate::error::{Error, Result};
pub use crate::protection::Protection;

// The engine (table/manager/remote/hooks/...) only exists where the
// interposition strategy (§9 "Dynamic dispatch / hooks") is implemented:
// `dlsym(RTLD_NEXT, ...)` and the Unix-domain-socket remote client are both
// Unix-only. On Windows only the raw mapping primitive (`os`, `page`) and
// the error type build; see the crate docs above.
#[cfg(unix)]
mod config;
#[cfg(unix)]
mod engine;
mod error;
#[cfg(unix)]
mod fault;
#[cfg(unix)]
mod guard;
#[cfg(unix)]
mod hooks;
#[cfg(unix)]
mod manager;
pub mod os;
pub mod page;
mod protection;
#[cfg(unix)]
mod remote;
#[cfg(unix)]
mod symbols;
#[cfg(unix)]
mod table;
#[cfg(unix)]
mod writeback;

#[cfg(unix)]
pub use crate::config::Config;
#[cfg(unix)]
pub use crate::manager::RegionManager;
#[cfg(unix)]
pub use crate::remote::{RemoteStore, SocketStore};
#[cfg(unix)]
pub use crate::table::{PageState, RegionInfo, RegionTable};
