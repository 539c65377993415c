//! The C-callable surface. Pure dispatch: decode arguments, validate the
//! handle, delegate to the registry. No engine logic lives here.
//!
//! Threading contract: entry into the process-wide registry is serialized
//! by a mutex, but access to any single handle must additionally be
//! serialized by the caller. Host memory callbacks run re-entrantly on the
//! stepping thread, inside a single instruction; the registry lock is
//! released for the duration of any operation that can reach a callback,
//! so a callback may call back into this surface. Operations on the handle
//! currently being stepped fail with the busy condition; stepping it again
//! from inside a callback stays unsupported.

use std::ffi::{c_char, c_int, c_longlong, c_void, CStr};
use std::sync::Mutex;

use anyhow::Context;
use tracing::{error, info};

use crate::adapter::{CallbackBundle, RamReadFn, RamWriteFn};
use crate::cpu::CpuInstance;
use crate::engine::{self, Xlen};
use crate::registry::{Handle, Registry};
use crate::setup_logging;

// --------------------------
// the process-wide registry
// --------------------------

static REGISTRY: Mutex<Option<Registry>> = Mutex::new(None);

fn with_registry<R>(f: impl FnOnce(&mut Registry) -> R) -> R {
  let mut guard = REGISTRY.lock().unwrap();
  let registry = guard.get_or_insert_with(|| Registry::new(engine::default_factory()));
  f(registry)
}

/// Run an operation that may call into the engine (and from there back into
/// the host and this surface) with the registry lock released: the instance
/// is taken out of its slot, worked on, then put back. While it is out, its
/// own handle resolves as busy rather than deadlocking the surface.
fn with_taken_cpu<R>(handle: u64, f: impl FnOnce(&mut CpuInstance) -> R) -> anyhow::Result<R> {
  let handle = Handle::from_raw(handle);
  let mut cpu = with_registry(|reg| reg.take(handle))?;
  let result = f(&mut cpu);
  with_registry(|reg| reg.restore(handle, cpu));
  Ok(result)
}

#[cfg(test)]
pub(crate) fn install_test_factory(factory: std::sync::Arc<dyn engine::EngineFactory>) {
  *REGISTRY.lock().unwrap() = Some(Registry::new(factory));
}

// --------------------------
// argument decoding
// --------------------------

unsafe fn opt_str(ptr: *const c_char) -> anyhow::Result<Option<String>> {
  if ptr.is_null() {
    return Ok(None);
  }
  let s = CStr::from_ptr(ptr).to_str().context("argument is not valid UTF-8")?;
  Ok(Some(s.to_string()))
}

/// An absent selector defaults to RV64; a present one selects RV64 iff it
/// mentions "64", anything else falls back to RV32.
fn parse_width(spec: Option<&str>) -> Xlen {
  match spec {
    None => Xlen::Rv64,
    Some(s) if s.contains("64") => Xlen::Rv64,
    Some(_) => Xlen::Rv32,
  }
}

fn status(result: anyhow::Result<()>) -> c_int {
  match result {
    Ok(()) => 0,
    Err(e) => {
      error!("{e:#}");
      -1
    }
  }
}

// --------------------------
// entry points
// --------------------------

#[no_mangle]
unsafe extern "C" fn rvb_allocate_cpu(spec: *const c_char, image: *const c_char) -> u64 {
  setup_logging();
  let spec = match opt_str(spec) {
    Ok(spec) => spec,
    Err(e) => {
      error!("bad width selector: {e:#}");
      return 0;
    }
  };
  let image = match opt_str(image) {
    Ok(image) => image,
    Err(e) => {
      error!("bad image path: {e:#}");
      return 0;
    }
  };
  let xlen = parse_width(spec.as_deref());
  info!("allocate {} core (image={:?})", xlen.name(), image);
  with_registry(|reg| reg.allocate(xlen, image)).raw()
}

#[no_mangle]
unsafe extern "C" fn rvb_free_cpu(handle: u64) -> c_int {
  with_registry(|reg| status(reg.free(Handle::from_raw(handle))))
}

#[no_mangle]
unsafe extern "C" fn rvb_cpu_set_ram_callbacks(
  handle: u64,
  read: Option<RamReadFn>,
  write: Option<RamWriteFn>,
  payload: *mut c_void,
) -> c_int {
  let (Some(read), Some(write)) = (read, write) else {
    error!("set_ram_callbacks requires both a read and a write callback");
    return -1;
  };
  let bundle = CallbackBundle { read, write, payload };
  // rebuilding the core may replay the image through the new callbacks
  status(with_taken_cpu(handle, |cpu| cpu.install_callbacks(bundle)))
}

#[no_mangle]
unsafe extern "C" fn rvb_cpu_simulate(handle: u64, steps: u64) -> c_longlong {
  let result = match with_taken_cpu(handle, |cpu| cpu.simulate(steps)) {
    Ok(result) => result,
    Err(e) => {
      error!("{e:#}");
      return -1;
    }
  };
  match result {
    Ok(n) => n as c_longlong,
    // a step that cannot complete is a broken execution invariant (for
    // instance a host callback returning nonzero), never a status code
    Err(e) => {
      error!("simulate aborted: {e:#}");
      std::process::abort();
    }
  }
}

#[no_mangle]
unsafe extern "C" fn rvb_cpu_cycles(handle: u64) -> c_longlong {
  with_registry(|reg| match reg.get_mut(Handle::from_raw(handle)) {
    Ok(cpu) => cpu.steps() as c_longlong,
    Err(e) => {
      error!("{e:#}");
      -1
    }
  })
}

#[no_mangle]
unsafe extern "C" fn rvb_cpu_pc(handle: u64) -> u64 {
  with_registry(|reg| {
    let value = reg.get_mut(Handle::from_raw(handle)).and_then(|cpu| cpu.read_register("pc"));
    match value {
      Ok(value) => value,
      Err(e) => {
        error!("{e:#}");
        0
      }
    }
  })
}

#[no_mangle]
unsafe extern "C" fn rvb_cpu_set_pc(handle: u64, value: u64) -> c_int {
  with_registry(|reg| {
    status(
      reg.get_mut(Handle::from_raw(handle)).and_then(|cpu| cpu.write_register("pc", value)),
    )
  })
}

#[no_mangle]
unsafe extern "C" fn rvb_cpu_read_register(
  handle: u64,
  name: *const c_char,
  out: *mut u64,
) -> c_int {
  let Ok(Some(name)) = opt_str(name) else {
    error!("read_register requires a valid UTF-8 register name");
    return -1;
  };
  if out.is_null() {
    error!("read_register requires an output pointer");
    return -1;
  }
  with_registry(|reg| {
    match reg.get_mut(Handle::from_raw(handle)).and_then(|cpu| cpu.read_register(&name)) {
      Ok(value) => {
        *out = value;
        0
      }
      Err(e) => {
        error!("{e:#}");
        -1
      }
    }
  })
}

#[no_mangle]
unsafe extern "C" fn rvb_cpu_write_register(handle: u64, name: *const c_char, value: u64) -> c_int {
  let Ok(Some(name)) = opt_str(name) else {
    error!("write_register requires a valid UTF-8 register name");
    return -1;
  };
  with_registry(|reg| {
    status(reg.get_mut(Handle::from_raw(handle)).and_then(|cpu| cpu.write_register(&name, value)))
  })
}

#[no_mangle]
unsafe extern "C" fn rvb_cpu_reset(handle: u64) -> c_int {
  // the rebuild may replay the image through installed callbacks
  status(with_taken_cpu(handle, |cpu| cpu.reset()))
}

#[no_mangle]
unsafe extern "C" fn rvb_cpu_set_verbosity(handle: u64, verbose: c_int) -> c_int {
  with_registry(|reg| {
    status(reg.get_mut(Handle::from_raw(handle)).map(|cpu| cpu.set_verbosity(verbose != 0)))
  })
}
