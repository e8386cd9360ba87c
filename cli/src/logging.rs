//! Logging initialisation for the `dexrpc` binary.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// What the `dexrpc` binary writes to stderr.
///
/// Filled from `--log-level`, `--log-crate <name>=<level>` and `--json-logs`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogConfig {
    /// Level for everything without its own entry in `crates`. Empty means `warn`.
    #[serde(default)]
    pub level: String,
    /// Crate-specific levels, e.g. `dexrpc-ws = "debug"` to trace reconnects
    /// without the HTTP client noise.
    #[serde(default)]
    pub crates: HashMap<String, String>,
    /// One JSON object per line, for shipping session logs to a collector.
    #[serde(default)]
    pub json: bool,
}

const FALLBACK_LEVEL: &str = "warn";

impl LogConfig {
    /// Filter directives, e.g. `warn,dexrpc_ws=debug`.
    pub fn directives(&self) -> String {
        let mut directives = match self.level.trim() {
            "" => FALLBACK_LEVEL.to_string(),
            level => level.to_string(),
        };
        let mut crates: Vec<_> = self.crates.iter().collect();
        crates.sort();
        for (name, level) in crates {
            directives.push_str(&format!(",{}={}", name.replace('-', "_"), level));
        }
        directives
    }
}

/// Install the global subscriber. `RUST_LOG` wins over `config` when set.
pub fn init(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.directives()))
        .unwrap_or_else(|_| EnvFilter::new(FALLBACK_LEVEL));

    // stdout carries command output; logs go to stderr.
    if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
