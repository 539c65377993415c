use std::sync::Arc;

#[cfg(feature = "pydrofoil")]
pub mod pydrofoil;

/// Address/instruction width of a simulated hart.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Xlen {
  Rv32,
  Rv64,
}

impl Xlen {
  pub fn name(&self) -> &'static str {
    match self {
      Xlen::Rv32 => "rv32",
      Xlen::Rv64 => "rv64",
    }
  }
}

/// One simulator core. Decode, ISA semantics and register file layout all
/// live behind this seam; the bridge only steps it and moves register values.
pub trait Engine: Send {
  /// Execute exactly one instruction.
  fn step(&mut self) -> anyhow::Result<()>;

  fn read_register(&mut self, name: &str) -> anyhow::Result<u64>;
  fn write_register(&mut self, name: &str, value: u64) -> anyhow::Result<()>;

  fn set_verbosity(&mut self, verbose: bool);
}

/// Memory as the engine sees it: 8-byte words, addressed by word index.
/// When a port is bound every access goes through it, none reaches any
/// engine-internal store.
pub trait MemoryPort: Send {
  fn read_word(&mut self, index: u64) -> anyhow::Result<u64>;
  fn write_word(&mut self, index: u64, value: u64) -> anyhow::Result<()>;
}

/// Builds engine instances. The port is bound at construction only: the
/// engine cannot rebind callbacks on a live core, so installing callbacks
/// later means building a fresh core (see `CpuInstance::install_callbacks`).
///
/// Construction is infallible from the caller's point of view; running out
/// of resources here is process-fatal, not a reportable error.
pub trait EngineFactory: Send + Sync {
  fn build(
    &self,
    xlen: Xlen,
    image: Option<&str>,
    ram: Option<Box<dyn MemoryPort>>,
  ) -> Box<dyn Engine>;
}

#[cfg(feature = "pydrofoil")]
pub(crate) fn default_factory() -> Arc<dyn EngineFactory> {
  Arc::new(pydrofoil::PydrofoilFactory)
}

#[cfg(not(feature = "pydrofoil"))]
pub(crate) fn default_factory() -> Arc<dyn EngineFactory> {
  Arc::new(MissingEngine)
}

/// Stand-in factory for builds without an engine backend. Handle validation
/// on the C surface still works; actually allocating a core dies loudly.
#[cfg(not(feature = "pydrofoil"))]
struct MissingEngine;

#[cfg(not(feature = "pydrofoil"))]
impl EngineFactory for MissingEngine {
  fn build(
    &self,
    _xlen: Xlen,
    _image: Option<&str>,
    _ram: Option<Box<dyn MemoryPort>>,
  ) -> Box<dyn Engine> {
    panic!("rvbridge was built without an engine backend, enable the `pydrofoil` feature");
  }
}
