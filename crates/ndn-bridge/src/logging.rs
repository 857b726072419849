//! Logging setup
//!
//! The crate logs through `tracing`. Binaries and tests call [`init`] once to
//! install a formatting subscriber; `RUST_LOG` takes precedence over the filter
//! passed in.

use ndn_bridge_config::BridgeConfig;
use tracing_subscriber::EnvFilter;

/// Install a global fmt subscriber. Later calls are no-ops.
pub fn init(filter: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init();
}

/// [`init`] with the configured `[logging] filter`
pub fn init_from_config(config: &BridgeConfig) {
    init(config.log_filter());
}
