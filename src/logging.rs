//! Tracing subscriber setup.
//!
//! Library code only emits `tracing` events. Binaries embedding the
//! executor call [`init_logging`] once at startup.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Installs a formatted subscriber filtered by `RUST_LOG`.
///
/// `default_directive` (for example `"edge_executor=info"`) applies when
/// `RUST_LOG` is unset or invalid. Returns `false` if a global subscriber
/// was already installed.
pub fn init_logging(default_directive: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
        .is_ok()
}
