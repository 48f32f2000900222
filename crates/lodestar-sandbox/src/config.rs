use serde::{Deserialize, Serialize};

/// Resource caps for every instance of a loaded module.
///
/// Modules get no imports at all: no filesystem, no network, no clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Maximum linear memory in bytes (default: 256 MB).
    pub memory_limit_bytes: u64,
    /// Fuel granted to each call. Running out is a timeout fault.
    /// `None` disables metering.
    pub fuel_per_call: Option<u64>,
    /// Idle instances kept for reuse per adapter.
    pub max_pooled_instances: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            memory_limit_bytes: 256 * 1024 * 1024, // 256 MB
            fuel_per_call: Some(1_000_000),
            max_pooled_instances: 16,
        }
    }
}
