//! Translation between the engine's word-indexed memory accesses and the
//! host's byte-addressed callback convention.

use std::ffi::{c_int, c_void};

use anyhow::bail;
use tracing::trace;

use crate::engine::MemoryPort;
use crate::registry::Handle;

/// Bytes per engine word. The engine addresses memory in words; host
/// callbacks see byte addresses, so every index is scaled by this in both
/// directions.
pub const WORD_BYTES: u64 = 8;

/// Host-side read callback: must write exactly 8 bytes through `dst` and
/// return 0 on success.
pub type RamReadFn = unsafe extern "C" fn(
  handle: u64,
  addr: u64,
  size: c_int,
  dst: *mut u64,
  payload: *mut c_void,
) -> c_int;

/// Host-side write callback: receives the full 8-byte value, returns 0 on
/// success.
pub type RamWriteFn = unsafe extern "C" fn(
  handle: u64,
  addr: u64,
  size: c_int,
  value: u64,
  payload: *mut c_void,
) -> c_int;

/// A pair of host callbacks plus an opaque payload, immutable once
/// installed on an instance.
#[derive(Copy, Clone)]
pub struct CallbackBundle {
  pub read: RamReadFn,
  pub write: RamWriteFn,
  pub payload: *mut c_void,
}

// Access to a handle (and therefore to its bundle) is serialized by the
// caller, see the threading contract on the C surface.
unsafe impl Send for CallbackBundle {}

/// `MemoryPort` over a host callback bundle. Stores nothing itself; every
/// access is converted and dispatched synchronously to the host.
pub(crate) struct HostRam {
  handle: Handle,
  bundle: CallbackBundle,
}

impl HostRam {
  pub(crate) fn new(handle: Handle, bundle: CallbackBundle) -> Self {
    Self { handle, bundle }
  }
}

impl MemoryPort for HostRam {
  fn read_word(&mut self, index: u64) -> anyhow::Result<u64> {
    let addr = index * WORD_BYTES;
    let mut value = 0u64;
    let status = unsafe {
      (self.bundle.read)(
        self.handle.raw(),
        addr,
        WORD_BYTES as c_int,
        &mut value,
        self.bundle.payload,
      )
    };
    if status != 0 {
      bail!("host read callback failed at addr={addr:#x} (status {status})");
    }
    trace!(
      "ram_read  (addr={addr:#x}, size={WORD_BYTES}, data={})",
      hex::encode(value.to_le_bytes())
    );
    Ok(value)
  }

  fn write_word(&mut self, index: u64, value: u64) -> anyhow::Result<()> {
    let addr = index * WORD_BYTES;
    let status = unsafe {
      (self.bundle.write)(
        self.handle.raw(),
        addr,
        WORD_BYTES as c_int,
        value,
        self.bundle.payload,
      )
    };
    if status != 0 {
      bail!("host write callback failed at addr={addr:#x} (status {status})");
    }
    trace!(
      "ram_write (addr={addr:#x}, size={WORD_BYTES}, data={})",
      hex::encode(value.to_le_bytes())
    );
    Ok(())
  }
}
