//! Foreign-function bridge exposing a RISC-V simulator engine through a
//! C-callable surface: opaque handles for live cores, host-installable
//! memory callbacks, per-step accounting.

use std::sync::Once;

use tracing_subscriber::{EnvFilter, FmtSubscriber};

pub mod adapter;
pub mod capi;
pub mod cpu;
pub mod engine;
pub mod registry;

#[cfg(test)]
pub(crate) mod testing;

static LOGGER: Once = Once::new();

/// Install the global subscriber once, on first use of the C surface. The
/// embedding process may already have one; losing that race is fine.
pub(crate) fn setup_logging() {
  LOGGER.call_once(|| {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
      .with_env_filter(filter)
      .without_time()
      .with_target(false)
      .with_ansi(true)
      .compact()
      .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
  });
}
