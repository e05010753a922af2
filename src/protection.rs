//! The protection flags the raw mapping primitive understands.
//!
//! Lives outside `table.rs` (which is Unix-only, built around `dlsym` and a
//! Unix-domain-socket remote client) because [`os`](crate::os) needs this
//! type on every platform, including Windows, where nothing else in this
//! crate builds.

bitflags::bitflags! {
  /// Protection requested of the raw mapping primitive.
  ///
  /// Only the three combinations the engine actually asks for are named;
  /// this is deliberately narrower than the teacher's `Protection`, which
  /// covered arbitrary executable/guarded memory for a generic VM API.
  pub struct Protection: usize {
    /// No access: the page has no local backing yet.
    const NONE = 0;
    /// Readable.
    const READ = 1 << 0;
    /// Writable.
    const WRITE = 1 << 1;
    /// Read and write, the state of a resident page.
    const READ_WRITE = Self::READ.bits | Self::WRITE.bits;
  }
}
