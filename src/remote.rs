//! Remote Store Client (§4.3).
//!
//! The remote memory store itself is external and opaque: some process
//! reachable over a local socket that can admit, free, fetch and store pages
//! on request. This module only defines the wire contract and a concrete
//! client over `UnixStream`; it does not implement the store.
//!
//! Framing and opcodes are not specified upstream — `original_source` never
//! shipped a wire format, only the shape of the calls (`vm_alloc`/`vm_fetch`/
//! `vm_store`/`vm_free`) — so this picks the plainest fixed-size-header
//! framing that keeps `fetch`/`store` allocation-free on the caller's side.

use crate::{Error, Result};
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;

/// Operations the remote memory store must support.
///
/// `fetch`/`store` take caller-supplied buffers rather than returning an
/// owned `Vec`, since the fault handler path (`fault::service_fault`) must
/// not allocate.
pub trait RemoteStore: Send + Sync {
  /// Requests a freshly admitted region of `size` bytes, returning the
  /// store's opaque identifier for it.
  fn vm_alloc(&self, size: usize) -> Result<u64>;

  /// Releases a previously admitted region.
  fn vm_free(&self, remote_id: u64) -> Result<()>;

  /// Fills the leading `bytes_read` of `buf` with the contents of one page
  /// of `remote_id` at `page_index`, returning `bytes_read`. `buf.len()`
  /// must equal the page size. A `bytes_read` short of `buf.len()` means
  /// the store has nothing for the remainder of the page; callers must
  /// treat it as zero-filled (§4.4 step 4, §7 "Paging failure") rather than
  /// an error — new pages are conceptually zero.
  fn vm_fetch(&self, remote_id: u64, page_index: usize, buf: &mut [u8]) -> Result<usize>;

  /// Writes `buf` back as one page of `remote_id` at `page_index`.
  fn vm_store(&self, remote_id: u64, page_index: usize, buf: &[u8]) -> Result<()>;
}

#[repr(u8)]
enum Opcode {
  Alloc = 1,
  Free = 2,
  Fetch = 3,
  Store = 4,
}

/// `RemoteStore` implementation speaking to a local peer over a Unix domain
/// socket (§4.3's "local IPC").
pub struct SocketStore {
  stream: std::sync::Mutex<UnixStream>,
}

impl SocketStore {
  /// Connects to the store listening at `path`.
  pub fn connect(path: &str) -> Result<Self> {
    let stream = UnixStream::connect(path).map_err(Error::RemoteUnreachable)?;
    Ok(SocketStore {
      stream: std::sync::Mutex::new(stream),
    })
  }

  /// Sends one request and reads back its reply. `reply` is the caller's
  /// scratch buffer for a fetch's page payload; for every other opcode it
  /// is empty. Returns the id field every reply carries plus the number of
  /// bytes the peer actually sent into `reply` — for `Fetch`, that can be
  /// fewer than `reply.len()` (§4.4 step 4: a short read means the tail of
  /// the page is conceptually zero, not an error).
  fn request(&self, opcode: Opcode, remote_id: u64, page_index: u32, payload: &[u8], reply: &mut [u8]) -> Result<(u64, usize)> {
    let mut stream = self.stream.lock().unwrap();

    let mut header = [0u8; 17];
    header[0] = opcode as u8;
    header[1..9].copy_from_slice(&remote_id.to_le_bytes());
    header[9..13].copy_from_slice(&page_index.to_le_bytes());
    header[13..17].copy_from_slice(&(payload.len() as u32).to_le_bytes());

    stream.write_all(&header).map_err(Error::RemoteUnreachable)?;
    if !payload.is_empty() {
      stream.write_all(payload).map_err(Error::RemoteUnreachable)?;
    }

    let mut status = [0u8; 1];
    stream.read_exact(&mut status).map_err(Error::RemoteUnreachable)?;
    if status[0] != 0 {
      return Err(match opcode {
        Opcode::Alloc => Error::RemoteAdmit(u64::from_le_bytes(payload[..8].try_into().unwrap()) as usize),
        _ => Error::RemoteRequestFailed(status[0]),
      });
    }

    let mut id_buf = [0u8; 8];
    stream.read_exact(&mut id_buf).map_err(Error::RemoteUnreachable)?;

    let mut bytes_read = 0;
    if matches!(opcode, Opcode::Fetch) {
      let mut len_buf = [0u8; 4];
      stream.read_exact(&mut len_buf).map_err(Error::RemoteUnreachable)?;
      let declared = u32::from_le_bytes(len_buf) as usize;
      bytes_read = declared.min(reply.len());
      stream.read_exact(&mut reply[..bytes_read]).map_err(Error::RemoteUnreachable)?;
      if declared > bytes_read {
        let mut discard = vec![0u8; declared - bytes_read];
        stream.read_exact(&mut discard).map_err(Error::RemoteUnreachable)?;
      }
    }

    Ok((u64::from_le_bytes(id_buf), bytes_read))
  }
}

impl RemoteStore for SocketStore {
  fn vm_alloc(&self, size: usize) -> Result<u64> {
    let size_buf = (size as u64).to_le_bytes();
    self.request(Opcode::Alloc, 0, 0, &size_buf, &mut []).map(|(id, _)| id)
  }

  fn vm_free(&self, remote_id: u64) -> Result<()> {
    self.request(Opcode::Free, remote_id, 0, &[], &mut [])?;
    Ok(())
  }

  fn vm_fetch(&self, remote_id: u64, page_index: usize, buf: &mut [u8]) -> Result<usize> {
    let (_, bytes_read) = self.request(Opcode::Fetch, remote_id, page_index as u32, &[], buf)?;
    Ok(bytes_read)
  }

  fn vm_store(&self, remote_id: u64, page_index: usize, buf: &[u8]) -> Result<()> {
    self.request(Opcode::Store, remote_id, page_index as u32, buf, &mut [])?;
    Ok(())
  }
}

#[cfg(test)]
pub mod mock {
  //! An in-memory `RemoteStore` used by engine and manager tests so they
  //! don't depend on a live socket peer.
  use super::*;
  use std::collections::HashMap;
  use std::sync::atomic::{AtomicU64, Ordering};
  use std::sync::Mutex;

  pub struct MockRemoteStore {
    next_id: AtomicU64,
    pages: Mutex<HashMap<(u64, usize), Vec<u8>>>,
    page_size: usize,
    pub fail_alloc: std::sync::atomic::AtomicBool,
  }

  impl MockRemoteStore {
    pub fn new(page_size: usize) -> Self {
      MockRemoteStore {
        next_id: AtomicU64::new(1),
        pages: Mutex::new(HashMap::new()),
        page_size,
        fail_alloc: std::sync::atomic::AtomicBool::new(false),
      }
    }
  }

  impl RemoteStore for MockRemoteStore {
    fn vm_alloc(&self, _size: usize) -> Result<u64> {
      if self.fail_alloc.load(Ordering::SeqCst) {
        return Err(Error::RemoteAdmit(_size));
      }
      Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn vm_free(&self, remote_id: u64) -> Result<()> {
      self.pages.lock().unwrap().retain(|(id, _), _| *id != remote_id);
      Ok(())
    }

    fn vm_fetch(&self, remote_id: u64, page_index: usize, buf: &mut [u8]) -> Result<usize> {
      let pages = self.pages.lock().unwrap();
      match pages.get(&(remote_id, page_index)) {
        Some(stored) => {
          buf.copy_from_slice(stored);
          Ok(stored.len())
        }
        None => {
          buf.iter_mut().for_each(|b| *b = 0);
          Ok(0)
        }
      }
    }

    fn vm_store(&self, remote_id: u64, page_index: usize, buf: &[u8]) -> Result<()> {
      assert_eq!(buf.len(), self.page_size);
      self.pages.lock().unwrap().insert((remote_id, page_index), buf.to_vec());
      Ok(())
    }
  }

  #[test]
  fn fetch_of_never_stored_page_is_zeroed() {
    let store = MockRemoteStore::new(4096);
    let id = store.vm_alloc(8192).unwrap();
    let mut buf = vec![0xffu8; 4096];
    store.vm_fetch(id, 0, &mut buf).unwrap();
    assert!(buf.iter().all(|&b| b == 0));
  }

  #[test]
  fn store_then_fetch_roundtrips() {
    let store = MockRemoteStore::new(4096);
    let id = store.vm_alloc(4096).unwrap();
    let page = vec![7u8; 4096];
    store.vm_store(id, 0, &page).unwrap();
    let mut buf = vec![0u8; 4096];
    store.vm_fetch(id, 0, &mut buf).unwrap();
    assert_eq!(buf, page);
  }

  #[test]
  fn free_drops_stored_pages() {
    let store = MockRemoteStore::new(4096);
    let id = store.vm_alloc(4096).unwrap();
    store.vm_store(id, 0, &vec![9u8; 4096]).unwrap();
    store.vm_free(id).unwrap();
    let mut buf = vec![0xffu8; 4096];
    store.vm_fetch(id, 0, &mut buf).unwrap();
    assert!(buf.iter().all(|&b| b == 0));
  }
}
