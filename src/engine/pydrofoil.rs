//! Bindings to the external libpydrofoil engine.
//!
//! The engine hands out opaque core pointers and, when given a pair of
//! memory callbacks at construction, routes every 8-byte word access
//! through them instead of its internal memory.

use std::ffi::{c_char, c_int, c_void, CString};

use anyhow::bail;
use tracing::error;

use crate::engine::{Engine, EngineFactory, MemoryPort, Xlen};

/// Engine-native memory callbacks. Addresses are word indices, not bytes.
type MemReadFn = unsafe extern "C" fn(ctx: *mut c_void, word: u64, value: *mut u64) -> c_int;
type MemWriteFn = unsafe extern "C" fn(ctx: *mut c_void, word: u64, value: u64) -> c_int;

extern "C" {
  fn pydrofoil_rv64_new(
    elf: *const c_char,
    read: Option<MemReadFn>,
    write: Option<MemWriteFn>,
    ctx: *mut c_void,
  ) -> *mut c_void;
  fn pydrofoil_rv32_new(
    elf: *const c_char,
    read: Option<MemReadFn>,
    write: Option<MemWriteFn>,
    ctx: *mut c_void,
  ) -> *mut c_void;
  fn pydrofoil_cpu_destroy(core: *mut c_void);
  fn pydrofoil_cpu_step(core: *mut c_void) -> c_int;
  fn pydrofoil_cpu_read_register(core: *mut c_void, name: *const c_char, out: *mut u64) -> c_int;
  fn pydrofoil_cpu_write_register(core: *mut c_void, name: *const c_char, value: u64) -> c_int;
  fn pydrofoil_cpu_set_verbosity(core: *mut c_void, verbose: c_int);
}

unsafe extern "C" fn ram_read_shim(ctx: *mut c_void, word: u64, value: *mut u64) -> c_int {
  let port = &mut **(ctx as *mut Box<dyn MemoryPort>);
  match port.read_word(word) {
    Ok(v) => {
      *value = v;
      0
    }
    Err(e) => {
      error!("ram read at word {word:#x} failed: {e:#}");
      -1
    }
  }
}

unsafe extern "C" fn ram_write_shim(ctx: *mut c_void, word: u64, value: u64) -> c_int {
  let port = &mut **(ctx as *mut Box<dyn MemoryPort>);
  match port.write_word(word, value) {
    Ok(()) => 0,
    Err(e) => {
      error!("ram write at word {word:#x} failed: {e:#}");
      -1
    }
  }
}

pub struct PydrofoilEngine {
  raw: *mut c_void,
  // Boxed twice so the shim context pointer stays put for the core's lifetime.
  _ram: Option<Box<Box<dyn MemoryPort>>>,
}

// The bridge contract is single-threaded access per handle; the raw core
// pointer never crosses threads concurrently.
unsafe impl Send for PydrofoilEngine {}

impl Engine for PydrofoilEngine {
  fn step(&mut self) -> anyhow::Result<()> {
    let status = unsafe { pydrofoil_cpu_step(self.raw) };
    if status != 0 {
      bail!("engine step failed with status {status}");
    }
    Ok(())
  }

  fn read_register(&mut self, name: &str) -> anyhow::Result<u64> {
    let c_name = CString::new(name)?;
    let mut value = 0u64;
    let status = unsafe { pydrofoil_cpu_read_register(self.raw, c_name.as_ptr(), &mut value) };
    if status != 0 {
      bail!("engine rejected register read of `{name}` (status {status})");
    }
    Ok(value)
  }

  fn write_register(&mut self, name: &str, value: u64) -> anyhow::Result<()> {
    let c_name = CString::new(name)?;
    let status = unsafe { pydrofoil_cpu_write_register(self.raw, c_name.as_ptr(), value) };
    if status != 0 {
      bail!("engine rejected register write of `{name}` (status {status})");
    }
    Ok(())
  }

  fn set_verbosity(&mut self, verbose: bool) {
    unsafe { pydrofoil_cpu_set_verbosity(self.raw, verbose as c_int) }
  }
}

impl Drop for PydrofoilEngine {
  fn drop(&mut self) {
    unsafe { pydrofoil_cpu_destroy(self.raw) }
  }
}

pub struct PydrofoilFactory;

impl EngineFactory for PydrofoilFactory {
  fn build(
    &self,
    xlen: Xlen,
    image: Option<&str>,
    ram: Option<Box<dyn MemoryPort>>,
  ) -> Box<dyn Engine> {
    let c_image = image.map(|p| CString::new(p).expect("image path contains a NUL byte"));
    let elf = c_image.as_ref().map_or(std::ptr::null(), |s| s.as_ptr());

    let mut ram = ram.map(Box::new);
    let (read, write, ctx) = match ram.as_mut() {
      Some(port) => (
        Some(ram_read_shim as MemReadFn),
        Some(ram_write_shim as MemWriteFn),
        &mut **port as *mut Box<dyn MemoryPort> as *mut c_void,
      ),
      None => (None, None, std::ptr::null_mut()),
    };

    let raw = unsafe {
      match xlen {
        Xlen::Rv64 => pydrofoil_rv64_new(elf, read, write, ctx),
        Xlen::Rv32 => pydrofoil_rv32_new(elf, read, write, ctx),
      }
    };
    assert!(!raw.is_null(), "fail creating {} core", xlen.name());

    Box::new(PydrofoilEngine { raw, _ram: ram })
  }
}
