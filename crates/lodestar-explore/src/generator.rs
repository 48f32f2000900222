use lodestar_ir::sequence::{CallSequence, Invocation};
use lodestar_ir::types::OperationSpec;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::value::ValueGenerator;
use crate::weights::{WeightTable, EPOCH_DECAY};

/// Structural edits applied to a corpus entry before it is extended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mutation {
    /// Redraw the arguments of one call.
    Reargs,
    /// Repeat one call in place.
    Duplicate,
    /// Remove one call.
    Delete,
    /// Exchange two calls.
    Swap,
}

const MUTATIONS: [Mutation; 4] = [
    Mutation::Reargs,
    Mutation::Duplicate,
    Mutation::Delete,
    Mutation::Swap,
];

/// Picks the next call of a sequence.
///
/// Operations are chosen through the worker's [`WeightTable`]; arguments
/// come from the [`ValueGenerator`]. Operations whose parameters cannot
/// be generated at all are never offered.
#[derive(Debug, Clone)]
pub struct CallGenerator {
    operations: Vec<OperationSpec>,
    values: ValueGenerator,
    weights: WeightTable,
}

impl CallGenerator {
    pub fn new(operations: &[OperationSpec], values: ValueGenerator) -> Result<Self, EngineError> {
        let operations: Vec<OperationSpec> = operations
            .iter()
            .filter(|op| op.params.iter().all(|p| p.domain.simplest().is_some()))
            .cloned()
            .collect();
        if operations.is_empty() {
            return Err(EngineError::NoOperations);
        }
        let weights = WeightTable::new(&operations);
        Ok(Self {
            operations,
            values,
            weights,
        })
    }

    pub fn operations(&self) -> &[OperationSpec] {
        &self.operations
    }

    pub fn values_mut(&mut self) -> &mut ValueGenerator {
        &mut self.values
    }

    pub fn weights(&self) -> &WeightTable {
        &self.weights
    }

    /// Draw the call that follows `sequence`.
    pub fn extend<R: Rng>(&self, sequence: &CallSequence, rng: &mut R) -> Result<Invocation, EngineError> {
        let index = self
            .weights
            .pick(&self.operations, rng)
            .ok_or(EngineError::NoOperations)?;
        let operation = &self.operations[index];
        let args = self
            .values
            .generate_call(operation, rng)
            .ok_or_else(|| EngineError::EmptyDomain {
                operation: operation.name.clone(),
            })?;
        Ok(Invocation {
            operation: operation.name.clone(),
            args,
            ordinal: sequence.len(),
        })
    }

    /// Apply one random [`Mutation`] to `sequence`.
    pub fn mutate<R: Rng>(&self, sequence: &CallSequence, rng: &mut R) -> (Mutation, CallSequence) {
        let mutation = MUTATIONS[rng.gen_range(0..MUTATIONS.len())];
        if sequence.is_empty() {
            return (mutation, sequence.clone());
        }
        let index = rng.gen_range(0..sequence.len());
        let mutated = match mutation {
            Mutation::Reargs => {
                let call = &sequence.calls()[index];
                let redrawn = self
                    .operations
                    .iter()
                    .find(|op| op.name == call.operation)
                    .and_then(|op| self.values.generate_call(op, rng));
                match redrawn {
                    Some(args) => sequence.with_args(index, args),
                    None => sequence.clone(),
                }
            }
            Mutation::Duplicate => sequence.with_duplicate(index),
            Mutation::Delete => sequence.without_range(index, index + 1),
            Mutation::Swap => sequence.with_swapped(index, rng.gen_range(0..sequence.len())),
        };
        (mutation, mutated)
    }

    /// Credit the operations of a sequence that reached new coverage.
    pub fn reward(&mut self, sequence: &CallSequence) {
        self.weights
            .reward(sequence.iter().map(|call| call.operation.as_str()));
    }

    /// End-of-epoch decay of operation weights.
    pub fn end_epoch(&mut self) {
        self.weights.decay_all(EPOCH_DECAY);
    }
}
