use std::sync::Arc;

use anyhow::bail;
use tracing::debug;

use crate::cpu::CpuInstance;
use crate::engine::{EngineFactory, Xlen};

/// Opaque token identifying one live instance: slot index in the low 32
/// bits, slot generation in the high 32. Generations start at 1, so the raw
/// value 0 is never issued and freed slots can be reused without a stale
/// handle ever resolving again.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Handle(u64);

impl Handle {
  pub(crate) fn new(index: u32, generation: u32) -> Self {
    Handle(((generation as u64) << 32) | index as u64)
  }

  pub fn from_raw(raw: u64) -> Self {
    Handle(raw)
  }

  pub fn raw(&self) -> u64 {
    self.0
  }

  fn index(&self) -> u32 {
    self.0 as u32
  }

  fn generation(&self) -> u32 {
    (self.0 >> 32) as u32
  }
}

struct Slot {
  generation: u32,
  cpu: Option<CpuInstance>,
  /// Instance temporarily taken out via `take`; the handle stays valid but
  /// resolves as busy until `restore`.
  busy: bool,
}

/// The set of live instances. Owned by whoever embeds the bridge (the C
/// surface keeps one process-wide; tests build their own), no implicit
/// eviction: entries live until explicitly freed.
pub struct Registry {
  slots: Vec<Slot>,
  free: Vec<u32>,
  factory: Arc<dyn EngineFactory>,
}

impl Registry {
  pub fn new(factory: Arc<dyn EngineFactory>) -> Self {
    Self { slots: Vec::new(), free: Vec::new(), factory }
  }

  /// Create a wrapper with a fresh engine and record it under a new unique
  /// handle. Does not fail: allocation failure is process-fatal.
  pub fn allocate(&mut self, xlen: Xlen, image: Option<String>) -> Handle {
    let index = match self.free.pop() {
      Some(index) => index,
      None => {
        let index = u32::try_from(self.slots.len()).expect("registry slot index overflow");
        self.slots.push(Slot { generation: 1, cpu: None, busy: false });
        index
      }
    };

    let slot = &mut self.slots[index as usize];
    let handle = Handle::new(index, slot.generation);
    slot.cpu = Some(CpuInstance::new(handle, xlen, image, self.factory.clone()));
    debug!("allocated handle {:#x}", handle.raw());
    handle
  }

  /// Release the instance behind `handle`. Fails on handles that are
  /// unknown or already freed; the second of two frees always fails.
  pub fn free(&mut self, handle: Handle) -> anyhow::Result<()> {
    let index = handle.index();
    let slot = match self.slots.get_mut(index as usize) {
      Some(slot) if slot.generation == handle.generation() => slot,
      _ => bail!("unknown cpu handle {:#x}", handle.raw()),
    };
    if slot.busy {
      bail!("cpu handle {:#x} is busy (re-entered from inside its own step?)", handle.raw());
    }
    if slot.cpu.take().is_none() {
      bail!("unknown cpu handle {:#x}", handle.raw());
    }

    // stale copies of this handle must never resolve again
    slot.generation += 1;
    self.free.push(index);
    debug!("freed handle {:#x}", handle.raw());
    Ok(())
  }

  /// Resolve a handle or fail hard. Every entry point validates through
  /// here before touching the instance.
  pub fn get_mut(&mut self, handle: Handle) -> anyhow::Result<&mut CpuInstance> {
    match self.slots.get_mut(handle.index() as usize) {
      Some(slot) if slot.generation == handle.generation() => {
        if slot.busy {
          bail!("cpu handle {:#x} is busy (re-entered from inside its own step?)", handle.raw());
        }
        match slot.cpu.as_mut() {
          Some(cpu) => Ok(cpu),
          None => bail!("unknown cpu handle {:#x}", handle.raw()),
        }
      }
      _ => bail!("unknown cpu handle {:#x}", handle.raw()),
    }
  }

  /// Temporarily remove the instance so it can be worked on with the
  /// registry lock released (host callbacks may re-enter the surface).
  /// Until `restore`, the handle resolves as busy: it cannot be freed,
  /// stepped or taken again.
  pub fn take(&mut self, handle: Handle) -> anyhow::Result<CpuInstance> {
    let slot = match self.slots.get_mut(handle.index() as usize) {
      Some(slot) if slot.generation == handle.generation() => slot,
      _ => bail!("unknown cpu handle {:#x}", handle.raw()),
    };
    if slot.busy {
      bail!("cpu handle {:#x} is busy (re-entered from inside its own step?)", handle.raw());
    }
    match slot.cpu.take() {
      Some(cpu) => {
        slot.busy = true;
        Ok(cpu)
      }
      None => bail!("unknown cpu handle {:#x}", handle.raw()),
    }
  }

  /// Put back an instance obtained from `take`. The slot cannot have been
  /// freed or reused in the meantime: busy slots refuse both.
  pub fn restore(&mut self, handle: Handle, cpu: CpuInstance) {
    let slot = self
      .slots
      .get_mut(handle.index() as usize)
      .expect("restore of a handle this registry never issued");
    assert!(
      slot.busy && slot.generation == handle.generation(),
      "restore of a handle this registry never issued"
    );
    slot.cpu = Some(cpu);
    slot.busy = false;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::ScriptedFactory;

  fn registry() -> Registry {
    Registry::new(ScriptedFactory::quiet())
  }

  #[test]
  fn handles_are_distinct_and_wrappers_independent() {
    let mut reg = registry();
    let handles: Vec<Handle> = (0..8).map(|_| reg.allocate(Xlen::Rv64, None)).collect();

    for (i, a) in handles.iter().enumerate() {
      for b in &handles[i + 1..] {
        assert_ne!(a, b);
      }
    }

    reg.get_mut(handles[2]).unwrap().simulate(4).unwrap();
    for (i, h) in handles.iter().enumerate() {
      let expected = if i == 2 { 4 } else { 0 };
      assert_eq!(reg.get_mut(*h).unwrap().steps(), expected);
    }
  }

  #[test]
  fn zero_is_never_a_valid_handle() {
    let mut reg = registry();
    reg.allocate(Xlen::Rv32, None);
    assert!(reg.get_mut(Handle::from_raw(0)).is_err());
  }

  #[test]
  fn free_is_single_shot() {
    let mut reg = registry();
    let h = reg.allocate(Xlen::Rv64, None);

    assert!(reg.free(h).is_ok());
    assert!(reg.free(h).is_err());
    assert!(reg.get_mut(h).is_err());
  }

  #[test]
  fn freeing_an_unknown_handle_fails() {
    let mut reg = registry();
    assert!(reg.free(Handle::from_raw(0xdead)).is_err());
  }

  #[test]
  fn reused_slots_do_not_resurrect_stale_handles() {
    let mut reg = registry();
    let old = reg.allocate(Xlen::Rv64, None);
    reg.free(old).unwrap();

    let new = reg.allocate(Xlen::Rv64, None);
    assert_ne!(old, new);
    assert!(reg.get_mut(old).is_err());
    assert!(reg.get_mut(new).is_ok());
  }

  #[test]
  fn taken_instances_resolve_as_busy_until_restored() {
    let mut reg = registry();
    let h = reg.allocate(Xlen::Rv64, None);

    let mut cpu = reg.take(h).unwrap();
    cpu.simulate(2).unwrap();

    assert!(reg.get_mut(h).is_err());
    assert!(reg.take(h).is_err());
    assert!(reg.free(h).is_err());

    reg.restore(h, cpu);
    assert_eq!(reg.get_mut(h).unwrap().steps(), 2);
    assert!(reg.free(h).is_ok());
  }
}
