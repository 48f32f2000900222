use std::collections::BTreeMap;

use lodestar_ir::types::InvariantSpec;
use serde::{Deserialize, Serialize};

use crate::adapter::{AdapterFault, SutAdapter};

/// Per-invariant result of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum InvariantOutcome {
    Held,
    /// First checkpoint at which the predicate was false. Checkpoint `k`
    /// is the state after `k` calls.
    Violated { checkpoint: usize },
}

impl InvariantOutcome {
    pub fn checkpoint(&self) -> Option<usize> {
        match self {
            InvariantOutcome::Held => None,
            InvariantOutcome::Violated { checkpoint } => Some(*checkpoint),
        }
    }
}

/// Evaluates a fixed invariant set at checkpoints, keeping only the first
/// violation of each invariant.
#[derive(Debug, Clone)]
pub struct InvariantChecker<'a> {
    invariants: &'a [InvariantSpec],
    outcomes: BTreeMap<String, InvariantOutcome>,
}

impl<'a> InvariantChecker<'a> {
    pub fn new(invariants: &'a [InvariantSpec]) -> Self {
        let outcomes = invariants
            .iter()
            .map(|inv| (inv.name.clone(), InvariantOutcome::Held))
            .collect();
        Self {
            invariants,
            outcomes,
        }
    }

    /// Evaluate every invariant that has not yet been violated. Returns the
    /// names newly violated at this checkpoint.
    pub fn check<A: SutAdapter>(
        &mut self,
        adapter: &A,
        snapshot: &A::Snapshot,
        checkpoint: usize,
    ) -> Result<Vec<String>, AdapterFault> {
        let mut newly_violated = Vec::new();
        for invariant in self.invariants {
            if self.outcomes.get(&invariant.name) != Some(&InvariantOutcome::Held) {
                continue;
            }
            if !adapter.observe(snapshot, invariant)? {
                self.outcomes.insert(
                    invariant.name.clone(),
                    InvariantOutcome::Violated { checkpoint },
                );
                newly_violated.push(invariant.name.clone());
            }
        }
        Ok(newly_violated)
    }

    pub fn outcomes(&self) -> &BTreeMap<String, InvariantOutcome> {
        &self.outcomes
    }

    pub fn into_outcomes(self) -> BTreeMap<String, InvariantOutcome> {
        self.outcomes
    }
}
