//! Error types and utilities.

use thiserror::Error as ThisError;

/// The result type used by this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// A collection of possible errors.
///
/// Two failure kinds from the error taxonomy this crate implements are *not*
/// represented here: bootstrap failure and fixed-remap failure in the fault
/// handler both abort the process rather than surface as a value (see
/// `engine::abort_process`).
#[derive(Debug, ThisError)]
pub enum Error {
  /// A supplied address or size was invalid for the operation (e.g. a null
  /// address, or a zero size).
  #[error("invalid parameter: {0}")]
  InvalidParameter(&'static str),

  /// The remote store refused to admit an allocation of the requested size.
  #[error("remote store refused to admit {0} bytes")]
  RemoteAdmit(usize),

  /// The remote store could not be reached at all (socket connect/IO
  /// failure).
  #[error("remote store unreachable: {0}")]
  RemoteUnreachable(#[from] std::io::Error),

  /// The remote store reached us but returned a non-zero status for a
  /// fetch, store or free request.
  #[error("remote store rejected the request (status {0})")]
  RemoteRequestFailed(u8),

  /// The raw mapping primitive could not reserve the requested address
  /// space.
  #[error("address space exhausted reserving {0} bytes: {1}")]
  AddressSpaceExhausted(usize, errno::Errno),

  /// The region table has no free slot.
  #[error("region table exhausted ({0} slots in use)")]
  TableExhausted(usize),

  /// No active region matches the supplied address.
  #[error("address does not name an active region")]
  NotFound,

  /// A raw system call failed.
  #[error("system call failed: {0}")]
  SystemCall(errno::Errno),
}
