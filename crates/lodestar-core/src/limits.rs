//! Resource limits and the campaign-level circuit breakers.
//!
//! A campaign stops when its wall-clock budget runs out or when adapter
//! faults make up too large a share of executed sequences. The engine
//! itself caps how many campaigns it holds and how large their inputs are.

use lodestar_ir::types::CampaignConfig;
use serde::{Deserialize, Serialize};

/// Resource limits for a single campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Maximum wall-clock seconds before forced stop.
    pub max_wall_secs: u64,
    /// Total sequences across all workers.
    pub max_sequences: u64,
    /// Fault share above which the adapter is considered broken.
    pub max_fault_rate: f64,
    /// Sequences to observe before the fault rate is judged.
    pub min_fault_samples: u64,
}

impl ResourceLimits {
    pub fn from_config(config: &CampaignConfig) -> Self {
        Self {
            max_wall_secs: config.time_budget_secs,
            max_sequences: config
                .iteration_budget
                .saturating_mul(config.worker_count as u64),
            max_fault_rate: config.max_fault_rate,
            min_fault_samples: config.min_fault_samples,
        }
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self::from_config(&CampaignConfig::default())
    }
}

/// Global engine limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineLimits {
    /// Maximum campaigns held by one manager.
    pub max_concurrent_campaigns: u32,
    /// Maximum WASM or WAT module size in bytes.
    pub max_module_bytes: u64,
    /// Maximum config JSON size in bytes.
    pub max_config_json_bytes: u64,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            max_concurrent_campaigns: 8,
            max_module_bytes: 64 * 1024 * 1024, // 64 MB
            max_config_json_bytes: 1024 * 1024, // 1 MB
        }
    }
}

/// Why the controller told its workers to stop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StopReason {
    /// Every worker spent its iteration budget.
    BudgetExhausted,
    WallTimeExceeded,
    FaultRateExceeded { faults: u64, sequences: u64 },
    ViolationFound,
    UserAborted,
}

/// Check resource usage against limits.
pub struct ResourceChecker {
    limits: ResourceLimits,
    start_time: std::time::Instant,
}

impl ResourceChecker {
    pub fn new(limits: ResourceLimits) -> Self {
        Self {
            limits,
            start_time: std::time::Instant::now(),
        }
    }

    /// Returns None if all ok, or the reason for stopping.
    pub fn check(&self, sequences: u64, faults: u64) -> Option<StopReason> {
        if self.wall_time_exceeded() {
            return Some(StopReason::WallTimeExceeded);
        }
        if self.fault_rate_exceeded(sequences, faults) {
            return Some(StopReason::FaultRateExceeded { faults, sequences });
        }
        if sequences >= self.limits.max_sequences {
            return Some(StopReason::BudgetExhausted);
        }
        None
    }

    /// Whether enough sequences were seen and too many of them faulted.
    pub fn fault_rate_exceeded(&self, sequences: u64, faults: u64) -> bool {
        sequences >= self.limits.min_fault_samples.max(1)
            && fault_rate(faults, sequences) > self.limits.max_fault_rate
    }

    /// Check only the wall-time limit.
    pub fn wall_time_exceeded(&self) -> bool {
        self.start_time.elapsed().as_secs() >= self.limits.max_wall_secs
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }
}

pub fn fault_rate(faults: u64, sequences: u64) -> f64 {
    if sequences == 0 {
        0.0
    } else {
        faults as f64 / sequences as f64
    }
}

/// Validate engine-level limits before accepting a campaign.
pub fn validate_engine_limits(
    engine_limits: &EngineLimits,
    current_campaigns: usize,
    module_size: usize,
    config_json_size: usize,
) -> Result<(), LimitViolation> {
    if current_campaigns as u32 >= engine_limits.max_concurrent_campaigns {
        return Err(LimitViolation::TooManyCampaigns {
            current: current_campaigns as u32,
            max: engine_limits.max_concurrent_campaigns,
        });
    }
    if module_size as u64 > engine_limits.max_module_bytes {
        return Err(LimitViolation::ModuleTooLarge {
            size: module_size as u64,
            max: engine_limits.max_module_bytes,
        });
    }
    if config_json_size as u64 > engine_limits.max_config_json_bytes {
        return Err(LimitViolation::ConfigTooLarge {
            size: config_json_size as u64,
            max: engine_limits.max_config_json_bytes,
        });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LimitViolation {
    #[error("too many concurrent campaigns ({current}/{max})")]
    TooManyCampaigns { current: u32, max: u32 },

    #[error("module too large ({size} bytes, max {max})")]
    ModuleTooLarge { size: u64, max: u64 },

    #[error("config JSON too large ({size} bytes, max {max})")]
    ConfigTooLarge { size: u64, max: u64 },
}
