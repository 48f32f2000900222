//! Counterexample minimization.
//!
//! Greedy delta debugging over one violated invariant. Each pass tries,
//! in order:
//! 1. removing single calls, last call first;
//! 2. removing chunks of halving size;
//! 3. moving each argument toward its domain's simplest value.
//!
//! A candidate is kept only if the same invariant is still violated at the
//! same or an earlier checkpoint; the sequence is then cut at that
//! checkpoint. Every kept candidate is shorter or simpler than the last, so
//! length and argument complexity never increase.

use lodestar_ir::sequence::CallSequence;
use lodestar_ir::types::{nearest_zero, ArgValue, CallValue, Domain, InvariantSpec, OperationSpec};
use lodestar_model::adapter::SutAdapter;
use lodestar_model::counterexample::{replay, Counterexample};
use lodestar_model::executor::{run, ExecutionOptions};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::EngineError;

/// Size of the working sequence after an accepted candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ShrinkStep {
    pub length: usize,
    pub complexity: u128,
}

/// Sum of [`Domain::complexity`] over every argument. Calls to unknown
/// operations count as maximally complex.
pub fn sequence_complexity(sequence: &CallSequence, operations: &[OperationSpec]) -> u128 {
    sequence.iter().fold(0u128, |total, call| {
        let Some(spec) = operations.iter().find(|op| op.name == call.operation) else {
            return u128::MAX;
        };
        call.args
            .args()
            .iter()
            .zip(&spec.params)
            .fold(total, |acc, (value, param)| {
                acc.saturating_add(param.domain.complexity(value))
            })
    })
}

pub struct Shrinker<'a, A: SutAdapter> {
    adapter: &'a A,
    options: ExecutionOptions,
    max_attempts: u32,
    attempts: u32,
    target: Vec<InvariantSpec>,
    history: Vec<ShrinkStep>,
}

impl<'a, A: SutAdapter> Shrinker<'a, A> {
    pub fn new(adapter: &'a A, options: ExecutionOptions, max_attempts: u32) -> Self {
        Self {
            adapter,
            options,
            max_attempts,
            attempts: 0,
            target: Vec::new(),
            history: Vec::new(),
        }
    }

    /// Working sequence sizes, first entry being the input cut at its
    /// checkpoint.
    pub fn history(&self) -> &[ShrinkStep] {
        &self.history
    }

    pub fn minimize(
        &mut self,
        sequence: &CallSequence,
        invariant: &str,
    ) -> Result<Counterexample, EngineError> {
        self.attempts = 0;
        self.history.clear();
        self.target = vec![InvariantSpec::new(invariant)];

        let initial = run(sequence, self.adapter, &self.target, self.options);
        let Some(mut checkpoint) = initial.violation_of(invariant) else {
            return Err(EngineError::NonDeterministic {
                invariant: invariant.to_string(),
                detail: format!("{sequence} no longer violates it"),
            });
        };
        let mut current = sequence.truncated(checkpoint);
        self.record(&current);

        loop {
            let before = self.measure(&current);
            self.remove_from_end(&mut current, &mut checkpoint);
            self.remove_chunks(&mut current, &mut checkpoint);
            self.simplify_args(&mut current, &mut checkpoint);
            if self.exhausted() || self.measure(&current) == before {
                break;
            }
        }

        let confirmed = replay(&current, invariant, checkpoint, self.adapter, self.options)
            .map_err(|e| EngineError::NonDeterministic {
                invariant: invariant.to_string(),
                detail: e.to_string(),
            })?;
        info!(
            %invariant,
            from = sequence.len(),
            to = current.len(),
            attempts = self.attempts,
            "counterexample minimized"
        );
        Ok(Counterexample {
            invariant: invariant.to_string(),
            sequence: current,
            checkpoint,
            final_state: confirmed.final_state,
            original_length: sequence.len(),
            shrink_attempts: self.attempts,
        })
    }

    fn exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    fn measure(&self, sequence: &CallSequence) -> ShrinkStep {
        ShrinkStep {
            length: sequence.len(),
            complexity: sequence_complexity(sequence, self.adapter.operations()),
        }
    }

    fn record(&mut self, sequence: &CallSequence) {
        let step = self.measure(sequence);
        debug!(length = step.length, complexity = %step.complexity, attempts = self.attempts, "shrink step");
        self.history.push(step);
    }

    /// Execute `candidate`; on a reproduction at or before `checkpoint`,
    /// adopt it cut at the new checkpoint.
    fn attempt(
        &mut self,
        candidate: CallSequence,
        current: &mut CallSequence,
        checkpoint: &mut usize,
    ) -> bool {
        if self.exhausted() {
            return false;
        }
        self.attempts += 1;
        let result = run(&candidate, self.adapter, &self.target, self.options);
        let Some(found) = self.target.first().and_then(|inv| result.violation_of(&inv.name)) else {
            return false;
        };
        if found > *checkpoint {
            return false;
        }
        *current = candidate.truncated(found);
        *checkpoint = found;
        self.record(current);
        true
    }

    fn remove_from_end(&mut self, current: &mut CallSequence, checkpoint: &mut usize) {
        let mut index = current.len();
        while index > 0 && !self.exhausted() {
            index -= 1;
            if index >= current.len() {
                index = current.len();
                continue;
            }
            let candidate = current.without_range(index, index + 1);
            self.attempt(candidate, current, checkpoint);
        }
    }

    fn remove_chunks(&mut self, current: &mut CallSequence, checkpoint: &mut usize) {
        let mut chunk = current.len() / 2;
        while chunk >= 2 && !self.exhausted() {
            let mut start = 0;
            while start + chunk <= current.len() && !self.exhausted() {
                let candidate = current.without_range(start, start + chunk);
                if !self.attempt(candidate, current, checkpoint) {
                    start += chunk;
                }
            }
            chunk /= 2;
        }
    }

    fn simplify_args(&mut self, current: &mut CallSequence, checkpoint: &mut usize) {
        let mut index = 0;
        while index < current.len() && !self.exhausted() {
            let Some(spec) = current
                .get(index)
                .and_then(|call| self.adapter.operation(&call.operation))
                .cloned()
            else {
                index += 1;
                continue;
            };
            for (position, param) in spec.params.iter().enumerate() {
                self.simplify_one(current, checkpoint, index, position, &param.domain);
            }
            index += 1;
        }
    }

    /// Walk one argument toward the origin until no simpler value
    /// reproduces.
    fn simplify_one(
        &mut self,
        current: &mut CallSequence,
        checkpoint: &mut usize,
        index: usize,
        position: usize,
        domain: &Domain,
    ) {
        loop {
            let Some(args) = current.get(index).map(|call| call.args.args().to_vec()) else {
                return;
            };
            let Some(value) = args.get(position) else {
                return;
            };
            let mut improved = false;
            for simpler in simpler_values(domain, value) {
                let mut args = args.clone();
                args[position] = simpler;
                let candidate = current.with_args(index, CallValue::new(args));
                if self.attempt(candidate, current, checkpoint) {
                    improved = true;
                    break;
                }
                if self.exhausted() {
                    return;
                }
            }
            if !improved {
                return;
            }
        }
    }
}

/// Candidate replacements for `value`, simplest first, each strictly less
/// complex than `value`.
fn simpler_values(domain: &Domain, value: &ArgValue) -> Vec<ArgValue> {
    let mut candidates: Vec<ArgValue> = domain.simplest().into_iter().collect();
    match (domain, value) {
        (Domain::Int { min, max }, ArgValue::Int(v)) => {
            let origin = nearest_zero(*min, *max) as i128;
            let v = *v as i128;
            let distance = v - origin;
            candidates.push(ArgValue::Int((origin + distance / 2) as i64));
            // Ever smaller jumps toward the origin, ending one step away.
            let mut jump = distance / 4;
            while jump != 0 {
                candidates.push(ArgValue::Int((v - jump) as i64));
                jump /= 2;
            }
            candidates.push(ArgValue::Int((v - distance.signum()) as i64));
        }
        (Domain::Enum { values }, ArgValue::Enum(current)) => {
            if let Some(p) = values.iter().position(|v| v == current) {
                if p > 0 {
                    candidates.push(ArgValue::Enum(values[p - 1].clone()));
                }
            }
        }
        (Domain::Address, ArgValue::Address(a)) => candidates.push(ArgValue::Address(a / 2)),
        (Domain::Bytes { .. }, ArgValue::Bytes(bytes)) => {
            candidates.push(ArgValue::Bytes(bytes[..bytes.len() / 2].to_vec()));
        }
        _ => {}
    }
    let limit = domain.complexity(value);
    let mut seen = Vec::new();
    candidates.retain(|c| {
        let keep = domain.complexity(c) < limit && !seen.contains(c);
        if keep {
            seen.push(c.clone());
        }
        keep
    });
    candidates
}

/// One-shot form of [`Shrinker::minimize`].
pub fn minimize<A: SutAdapter>(
    adapter: &A,
    options: ExecutionOptions,
    max_attempts: u32,
    sequence: &CallSequence,
    invariant: &str,
) -> Result<Counterexample, EngineError> {
    Shrinker::new(adapter, options, max_attempts).minimize(sequence, invariant)
}
