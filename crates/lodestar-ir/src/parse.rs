use crate::types::{CampaignConfig, InvariantSpec};

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(#[from] ConfigError),
}

/// A structurally valid config whose values make no sense.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("worker_count must be at least 1")]
    NoWorkers,

    #[error("max_sequence_length must be at least 1")]
    EmptySequences,

    #[error("{field} must be within [0, 1], got {value}")]
    ProbabilityOutOfRange { field: &'static str, value: f64 },

    #[error("max_corpus_entries must be at least 1")]
    EmptyCorpus,
}

/// Parse a campaign config from JSON and validate it.
pub fn parse_config(json: &str) -> Result<CampaignConfig, ParseError> {
    let config: CampaignConfig = serde_json::from_str(json)?;
    validate_config(&config)?;
    Ok(config)
}

/// Parse a JSON list of invariant declarations.
pub fn parse_invariants(json: &str) -> Result<Vec<InvariantSpec>, ParseError> {
    Ok(serde_json::from_str(json)?)
}

impl CampaignConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_config(self)
    }
}

pub fn validate_config(config: &CampaignConfig) -> Result<(), ConfigError> {
    if config.worker_count == 0 {
        return Err(ConfigError::NoWorkers);
    }
    if config.max_sequence_length == 0 {
        return Err(ConfigError::EmptySequences);
    }
    if config.max_corpus_entries == 0 {
        return Err(ConfigError::EmptyCorpus);
    }
    for (field, value) in [
        ("mutation_probability", config.mutation_probability),
        ("max_fault_rate", config.max_fault_rate),
    ] {
        if !(0.0..=1.0).contains(&value) {
            return Err(ConfigError::ProbabilityOutOfRange { field, value });
        }
    }
    Ok(())
}
