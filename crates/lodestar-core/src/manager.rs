use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use lodestar_explore::cancel::CancelToken;
use lodestar_explore::worker::Progress;
use lodestar_ir::parse::parse_config;
use lodestar_ir::types::{CampaignConfig, InvariantSpec};
use lodestar_model::adapter::SutAdapter;
use lodestar_sandbox::config::SandboxConfig;
use lodestar_sandbox::wasm_sut::WasmSut;
use serde::Serialize;
use tracing::{info, warn};

use crate::analytics::CampaignPhase;
use crate::campaign::{Campaign, CampaignError, CampaignReport};
use crate::limits::{validate_engine_limits, EngineLimits};

/// Point-in-time view of one managed campaign.
#[derive(Debug, Clone, Serialize)]
pub struct CampaignStatus {
    pub id: String,
    pub phase: CampaignPhase,
    pub operations: Vec<String>,
    pub invariants: Vec<String>,
    pub config: CampaignConfig,
    pub sequences: u64,
    pub calls: u64,
    pub faults: u64,
    pub report: Option<CampaignReport>,
    pub error: Option<String>,
}

struct ManagedCampaign {
    campaign: Arc<Campaign<WasmSut>>,
    cancel: CancelToken,
    progress: Arc<Progress>,
    phase: CampaignPhase,
    handle: Option<JoinHandle<()>>,
    report: Option<CampaignReport>,
    error: Option<String>,
}

impl ManagedCampaign {
    fn status(&self, id: &str) -> CampaignStatus {
        CampaignStatus {
            id: id.to_string(),
            phase: self.phase,
            operations: self
                .campaign
                .adapter()
                .operations()
                .iter()
                .map(|op| op.name.clone())
                .collect(),
            invariants: self
                .campaign
                .invariants()
                .iter()
                .map(|inv| inv.name.clone())
                .collect(),
            config: self.campaign.config().clone(),
            sequences: self.progress.sequences(),
            calls: self.progress.calls(),
            faults: self.progress.faults(),
            report: self.report.clone(),
            error: self.error.clone(),
        }
    }
}

type Registry = Arc<Mutex<HashMap<String, ManagedCampaign>>>;

fn lock(registry: &Registry) -> MutexGuard<'_, HashMap<String, ManagedCampaign>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registry of WASM-backed campaigns, each run on its own background
/// thread.
pub struct CampaignManager {
    campaigns: Registry,
    next_id: Mutex<u64>,
    engine_limits: EngineLimits,
    sandbox: SandboxConfig,
}

impl CampaignManager {
    pub fn new() -> Self {
        Self::with_limits(EngineLimits::default(), SandboxConfig::default())
    }

    pub fn with_limits(engine_limits: EngineLimits, sandbox: SandboxConfig) -> Self {
        Self {
            campaigns: Arc::new(Mutex::new(HashMap::new())),
            next_id: Mutex::new(1),
            engine_limits,
            sandbox,
        }
    }

    /// Load a module (binary WASM or WAT text) and register an idle
    /// campaign against it.
    ///
    /// `invariants` defaults to every `invariant_*` export; `config_json`
    /// defaults to [`CampaignConfig::default`].
    pub fn load(
        &self,
        module: &[u8],
        invariants: Option<Vec<InvariantSpec>>,
        config_json: Option<&str>,
    ) -> Result<String, CampaignError> {
        validate_engine_limits(
            &self.engine_limits,
            self.active_campaign_count(),
            module.len(),
            config_json.map_or(0, str::len),
        )?;
        let config = match config_json {
            Some(json) => parse_config(json)?,
            None => CampaignConfig::default(),
        };
        let adapter = WasmSut::load(module, &self.sandbox)?;
        let invariants = invariants.unwrap_or_else(|| adapter.invariant_specs());
        let campaign = Campaign::new(Arc::new(adapter), invariants, config)?;

        let id = {
            let mut next = self.next_id.lock().unwrap_or_else(PoisonError::into_inner);
            let id = format!("campaign-{:04}", *next);
            *next += 1;
            id
        };
        info!(campaign = %id, "campaign loaded");

        let managed = ManagedCampaign {
            cancel: campaign.cancel_token(),
            progress: campaign.progress(),
            campaign: Arc::new(campaign),
            phase: CampaignPhase::Idle,
            handle: None,
            report: None,
            error: None,
        };
        lock(&self.campaigns).insert(id.clone(), managed);
        Ok(id)
    }

    /// Start an idle campaign on a background thread.
    pub fn start(&self, id: &str) -> Result<(), CampaignError> {
        let mut campaigns = lock(&self.campaigns);
        let managed = campaigns
            .get_mut(id)
            .ok_or_else(|| CampaignError::NotFound(id.to_string()))?;
        if managed.phase != CampaignPhase::Idle {
            return Err(CampaignError::InvalidState(format!(
                "{id} is {:?}, not idle",
                managed.phase
            )));
        }

        let campaign = Arc::clone(&managed.campaign);
        let registry = Arc::clone(&self.campaigns);
        let campaign_id = id.to_string();
        let handle = std::thread::Builder::new()
            .name(format!("lodestar-{id}"))
            .spawn(move || {
                let result = campaign.run();
                let mut campaigns = lock(&registry);
                let Some(managed) = campaigns.get_mut(&campaign_id) else {
                    return;
                };
                match result {
                    Ok(report) => {
                        managed.phase = report.phase();
                        managed.report = Some(report);
                    }
                    Err(e) => {
                        warn!(campaign = %campaign_id, error = %e, "campaign errored");
                        managed.phase = CampaignPhase::Errored;
                        managed.error = Some(e.to_string());
                    }
                }
            })
            .map_err(|e| CampaignError::InvalidState(format!("cannot spawn campaign thread: {e}")))?;

        managed.phase = CampaignPhase::Running;
        managed.handle = Some(handle);
        Ok(())
    }

    /// Block until a started campaign reaches a terminal phase.
    pub fn wait(&self, id: &str) -> Result<CampaignStatus, CampaignError> {
        let handle = {
            let mut campaigns = lock(&self.campaigns);
            let managed = campaigns
                .get_mut(id)
                .ok_or_else(|| CampaignError::NotFound(id.to_string()))?;
            managed.handle.take()
        };
        if let Some(handle) = handle {
            if handle.join().is_err() {
                if let Some(managed) = lock(&self.campaigns).get_mut(id) {
                    managed.phase = CampaignPhase::Errored;
                    managed.error = Some("campaign thread panicked".to_string());
                }
            }
        }
        self.status(id)
    }

    pub fn status(&self, id: &str) -> Result<CampaignStatus, CampaignError> {
        lock(&self.campaigns)
            .get(id)
            .map(|managed| managed.status(id))
            .ok_or_else(|| CampaignError::NotFound(id.to_string()))
    }

    /// Stop a campaign. A running one winds down to `Stopped` (or
    /// `Failed`, if a violation was already in hand); an idle one is
    /// marked `Stopped` immediately.
    pub fn abort(&self, id: &str) -> Result<CampaignStatus, CampaignError> {
        let mut campaigns = lock(&self.campaigns);
        let managed = campaigns
            .get_mut(id)
            .ok_or_else(|| CampaignError::NotFound(id.to_string()))?;
        match managed.phase {
            CampaignPhase::Idle => managed.phase = CampaignPhase::Stopped,
            CampaignPhase::Running => managed.cancel.cancel(),
            _ => {}
        }
        info!(campaign = %id, "abort requested");
        Ok(managed.status(id))
    }

    /// Number of registered campaigns.
    pub fn active_campaign_count(&self) -> usize {
        lock(&self.campaigns).len()
    }

    /// Forget a campaign that is not running.
    pub fn remove(&self, id: &str) -> Result<(), CampaignError> {
        let mut campaigns = lock(&self.campaigns);
        match campaigns.get(id) {
            None => Err(CampaignError::NotFound(id.to_string())),
            Some(managed) if managed.phase == CampaignPhase::Running => Err(
                CampaignError::InvalidState(format!("{id} is still running")),
            ),
            Some(_) => {
                campaigns.remove(id);
                Ok(())
            }
        }
    }
}

impl Default for CampaignManager {
    fn default() -> Self {
        Self::new()
    }
}
