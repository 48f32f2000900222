use lodestar_ir::sequence::CallSequence;
use lodestar_ir::types::InvariantSpec;
use serde::{Deserialize, Serialize};

use crate::adapter::{AdapterFault, SutAdapter};
use crate::executor::{run, ExecutionOptions, ExecutionResult};

/// A minimized sequence that falsifies one invariant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Counterexample {
    pub invariant: String,
    pub sequence: CallSequence,
    /// Checkpoint at which the invariant is false when `sequence` is replayed.
    pub checkpoint: usize,
    pub final_state: serde_json::Value,
    /// Length of the sequence before shrinking.
    pub original_length: usize,
    pub shrink_attempts: u32,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReplayError {
    #[error("replay hit an adapter fault: {0}")]
    Fault(#[from] AdapterFault),

    #[error(
        "invariant '{invariant}' expected violated at checkpoint {expected}, replay gave {actual:?}"
    )]
    Mismatch {
        invariant: String,
        expected: usize,
        actual: Option<usize>,
    },
}

impl Counterexample {
    /// Re-execute the sequence from a fresh instance and confirm it
    /// violates the same invariant at the same checkpoint.
    pub fn replay<A: SutAdapter>(
        &self,
        adapter: &A,
        options: ExecutionOptions,
    ) -> Result<ExecutionResult, ReplayError> {
        replay(&self.sequence, &self.invariant, self.checkpoint, adapter, options)
    }
}

/// Run `sequence` checking only `invariant`, and require a violation at
/// exactly `checkpoint`.
pub fn replay<A: SutAdapter>(
    sequence: &CallSequence,
    invariant: &str,
    checkpoint: usize,
    adapter: &A,
    options: ExecutionOptions,
) -> Result<ExecutionResult, ReplayError> {
    let invariants = [InvariantSpec::new(invariant)];
    let result = run(sequence, adapter, &invariants, options);
    let actual = result.violation_of(invariant);
    if actual == Some(checkpoint) {
        return Ok(result);
    }
    if let Some(fault) = result.fault {
        return Err(ReplayError::Fault(fault));
    }
    Err(ReplayError::Mismatch {
        invariant: invariant.to_string(),
        expected: checkpoint,
        actual,
    })
}
