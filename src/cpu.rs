use std::sync::Arc;

use tracing::debug;

use crate::adapter::{CallbackBundle, HostRam};
use crate::engine::{Engine, EngineFactory, Xlen};
use crate::registry::Handle;

/// One live simulated CPU: an engine instance plus the bookkeeping the
/// bridge owes the host (step count, width, construction argument and the
/// optionally installed callback bundle).
pub struct CpuInstance {
  handle: Handle,
  xlen: Xlen,
  image: Option<String>,
  steps: u64,
  ram: Option<CallbackBundle>,
  engine: Box<dyn Engine>,
  factory: Arc<dyn EngineFactory>,
}

impl CpuInstance {
  pub(crate) fn new(
    handle: Handle,
    xlen: Xlen,
    image: Option<String>,
    factory: Arc<dyn EngineFactory>,
  ) -> Self {
    debug!("new {} core (handle={:#x}, image={:?})", xlen.name(), handle.raw(), image);
    let engine = factory.build(xlen, image.as_deref(), None);
    Self { handle, xlen, image, steps: 0, ram: None, engine, factory }
  }

  /// Completed single-steps since the last (re)construction.
  pub fn steps(&self) -> u64 {
    self.steps
  }

  /// Rebuild the engine with the current width/image/bundle configuration.
  /// The engine binds memory callbacks at construction only, so this is the
  /// single place a core ever gets replaced.
  fn rebuild(&mut self) {
    let ram = self.ram.map(|bundle| {
      Box::new(HostRam::new(self.handle, bundle)) as Box<dyn crate::engine::MemoryPort>
    });
    self.engine = self.factory.build(self.xlen, self.image.as_deref(), ram);
    self.steps = 0;
  }

  /// Install a host memory bundle. Must happen before the first step if
  /// interception is wanted: the rebuild discards any progress made so far.
  /// There is no way back to the unbound state short of freeing the handle.
  pub fn install_callbacks(&mut self, bundle: CallbackBundle) {
    self.ram = Some(bundle);
    self.rebuild();
  }

  /// Discard accumulated state, keeping width, image and any installed
  /// bundle.
  pub fn reset(&mut self) {
    self.rebuild();
  }

  pub fn step(&mut self) -> anyhow::Result<()> {
    self.engine.step()?;
    self.steps += 1;
    Ok(())
  }

  /// Run `n` sequential steps. Returns `n` as confirmation: a step that
  /// cannot complete propagates its error immediately rather than reporting
  /// partial progress.
  pub fn simulate(&mut self, n: u64) -> anyhow::Result<u64> {
    for _ in 0..n {
      self.step()?;
    }
    Ok(n)
  }

  pub fn read_register(&mut self, name: &str) -> anyhow::Result<u64> {
    self.engine.read_register(name)
  }

  pub fn write_register(&mut self, name: &str, value: u64) -> anyhow::Result<()> {
    self.engine.write_register(name, value)
  }

  pub fn set_verbosity(&mut self, verbose: bool) {
    self.engine.set_verbosity(verbose);
  }
}
