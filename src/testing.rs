//! Test doubles: a scripted engine that replays a fixed memory-access
//! pattern on every step, and host callback bundles that record or fail.

use std::collections::HashMap;
use std::ffi::{c_int, c_void};
use std::sync::{Arc, Mutex};

use anyhow::bail;

use crate::adapter::CallbackBundle;
use crate::engine::{Engine, EngineFactory, MemoryPort, Xlen};

/// Memory traffic as seen from the host side of the callback boundary.
#[derive(Default)]
pub(crate) struct Traffic {
  pub reads: Vec<(u64, c_int)>,
  pub writes: Vec<(u64, c_int, u64)>,
  pub handles: Vec<u64>,
}

unsafe extern "C" fn record_read(
  handle: u64,
  addr: u64,
  size: c_int,
  dst: *mut u64,
  payload: *mut c_void,
) -> c_int {
  let traffic = &mut *(payload as *mut Traffic);
  traffic.handles.push(handle);
  traffic.reads.push((addr, size));
  *dst = 0;
  0
}

unsafe extern "C" fn record_write(
  handle: u64,
  addr: u64,
  size: c_int,
  value: u64,
  payload: *mut c_void,
) -> c_int {
  let traffic = &mut *(payload as *mut Traffic);
  traffic.handles.push(handle);
  traffic.writes.push((addr, size, value));
  0
}

pub(crate) fn recording_bundle(traffic: &mut Traffic) -> CallbackBundle {
  CallbackBundle {
    read: record_read,
    write: record_write,
    payload: traffic as *mut Traffic as *mut c_void,
  }
}

unsafe extern "C" fn fail_read(
  _handle: u64,
  _addr: u64,
  _size: c_int,
  _dst: *mut u64,
  _payload: *mut c_void,
) -> c_int {
  1
}

unsafe extern "C" fn fail_write(
  _handle: u64,
  _addr: u64,
  _size: c_int,
  _value: u64,
  _payload: *mut c_void,
) -> c_int {
  1
}

pub(crate) fn failing_bundle() -> CallbackBundle {
  CallbackBundle { read: fail_read, write: fail_write, payload: std::ptr::null_mut() }
}

#[derive(Copy, Clone)]
enum Access {
  Read(u64),
  Write(u64, u64),
}

/// Builds `ScriptedEngine`s and remembers, per build, whether a memory port
/// was bound. That record is how tests observe rebuild-on-install and
/// bundle survival across reset.
pub(crate) struct ScriptedFactory {
  script: Vec<Access>,
  builds: Mutex<Vec<bool>>,
}

impl ScriptedFactory {
  /// Engine whose steps touch no memory.
  pub(crate) fn quiet() -> Arc<Self> {
    Arc::new(Self { script: Vec::new(), builds: Mutex::new(Vec::new()) })
  }

  /// Engine that reads the given words, in order, on every step.
  pub(crate) fn reads(words: Vec<u64>) -> Arc<Self> {
    let script = words.into_iter().map(Access::Read).collect();
    Arc::new(Self { script, builds: Mutex::new(Vec::new()) })
  }

  /// Engine that writes the given (word, value) pairs on every step.
  pub(crate) fn writes(pairs: Vec<(u64, u64)>) -> Arc<Self> {
    let script = pairs.into_iter().map(|(w, v)| Access::Write(w, v)).collect();
    Arc::new(Self { script, builds: Mutex::new(Vec::new()) })
  }

  /// `true` per build that carried a memory port.
  pub(crate) fn builds(&self) -> Vec<bool> {
    self.builds.lock().unwrap().clone()
  }
}

impl EngineFactory for ScriptedFactory {
  fn build(
    &self,
    _xlen: Xlen,
    _image: Option<&str>,
    ram: Option<Box<dyn MemoryPort>>,
  ) -> Box<dyn Engine> {
    self.builds.lock().unwrap().push(ram.is_some());
    Box::new(ScriptedEngine {
      script: self.script.clone(),
      ram,
      regs: HashMap::new(),
      verbose: false,
    })
  }
}

struct ScriptedEngine {
  script: Vec<Access>,
  ram: Option<Box<dyn MemoryPort>>,
  regs: HashMap<String, u64>,
  verbose: bool,
}

impl Engine for ScriptedEngine {
  fn step(&mut self) -> anyhow::Result<()> {
    if self.verbose {
      tracing::trace!("scripted step");
    }
    if let Some(ram) = self.ram.as_mut() {
      for access in &self.script {
        match *access {
          Access::Read(word) => {
            ram.read_word(word)?;
          }
          Access::Write(word, value) => ram.write_word(word, value)?,
        }
      }
    }
    let pc = self.regs.entry("pc".to_string()).or_insert(0);
    *pc = pc.wrapping_add(4);
    Ok(())
  }

  fn read_register(&mut self, name: &str) -> anyhow::Result<u64> {
    if name == "pc" {
      return Ok(*self.regs.entry("pc".to_string()).or_insert(0));
    }
    match self.regs.get(name) {
      Some(value) => Ok(*value),
      None => bail!("unknown register `{name}`"),
    }
  }

  fn write_register(&mut self, name: &str, value: u64) -> anyhow::Result<()> {
    self.regs.insert(name.to_string(), value);
    Ok(())
  }

  fn set_verbosity(&mut self, verbose: bool) {
    self.verbose = verbose;
  }
}
