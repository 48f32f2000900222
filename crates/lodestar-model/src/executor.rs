use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use lodestar_ir::sequence::{CallSequence, Invocation};
use lodestar_ir::types::{CampaignConfig, CheckpointPolicy, InvariantSpec};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::adapter::{AdapterFault, CallStatus, SutAdapter};
use crate::invariant::{InvariantChecker, InvariantOutcome};

/// Knobs that change how a sequence is executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionOptions {
    pub policy: CheckpointPolicy,
    /// Upper bound on a single `apply`, checked once the call returns.
    /// Overrun is an adapter fault.
    pub call_timeout: Option<Duration>,
}

impl ExecutionOptions {
    pub fn from_config(config: &CampaignConfig) -> Self {
        Self {
            policy: config.checkpoint_policy,
            call_timeout: config.call_timeout_ms.map(Duration::from_millis),
        }
    }
}

/// What happened to one applied call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub operation: String,
    pub status: CallStatus,
    /// Adapter fingerprint of the state after the call.
    pub fingerprint: Option<u64>,
}

/// Everything observed while executing one sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Calls attempted, in order. On a fault this ends with the faulting call.
    pub sequence: CallSequence,
    /// One record per call that completed.
    pub steps: Vec<StepRecord>,
    pub invariants: BTreeMap<String, InvariantOutcome>,
    pub fault: Option<AdapterFault>,
    /// Fingerprint of the fresh instance.
    pub initial_fingerprint: Option<u64>,
    /// Adapter's description of the last valid state.
    pub final_state: serde_json::Value,
}

impl ExecutionResult {
    pub fn is_fault(&self) -> bool {
        self.fault.is_some()
    }

    pub fn violation_of(&self, invariant: &str) -> Option<usize> {
        self.invariants.get(invariant)?.checkpoint()
    }

    /// All violations as `(invariant, checkpoint)`, earliest checkpoint first.
    pub fn violations(&self) -> Vec<(&str, usize)> {
        let mut found: Vec<(&str, usize)> = self
            .invariants
            .iter()
            .filter_map(|(name, outcome)| outcome.checkpoint().map(|c| (name.as_str(), c)))
            .collect();
        found.sort_by_key(|&(name, checkpoint)| (checkpoint, name));
        found
    }

    pub fn first_violation(&self) -> Option<(&str, usize)> {
        self.violations().into_iter().next()
    }

    pub fn rejected_calls(&self) -> usize {
        self.steps.iter().filter(|s| !s.status.is_ok()).count()
    }
}

/// An execution in progress against one SUT instance.
///
/// The worker loop grows a sequence one call at a time through this
/// session so that each call is applied exactly once. [`run`] drives the
/// same session over a complete sequence.
pub struct Execution<'a, A: SutAdapter> {
    adapter: &'a A,
    options: ExecutionOptions,
    checker: InvariantChecker<'a>,
    snapshot: Option<A::Snapshot>,
    sequence: CallSequence,
    steps: Vec<StepRecord>,
    fault: Option<AdapterFault>,
    initial_fingerprint: Option<u64>,
}

impl<'a, A: SutAdapter> Execution<'a, A> {
    /// Create a fresh instance and, under the per-call policy, check
    /// checkpoint 0.
    pub fn start(
        adapter: &'a A,
        invariants: &'a [InvariantSpec],
        options: ExecutionOptions,
    ) -> Self {
        let mut execution = Self {
            adapter,
            options,
            checker: InvariantChecker::new(invariants),
            snapshot: None,
            sequence: CallSequence::new(),
            steps: Vec::new(),
            fault: None,
            initial_fingerprint: None,
        };
        match adapter.new_instance() {
            Ok(snapshot) => {
                execution.initial_fingerprint = adapter.fingerprint(&snapshot);
                execution.snapshot = Some(snapshot);
                if options.policy == CheckpointPolicy::PerCall {
                    execution.checkpoint(0);
                }
            }
            Err(fault) => execution.fault = Some(fault),
        }
        execution
    }

    /// Apply one call. Returns whether execution can continue; `false`
    /// means an adapter fault ended it.
    pub fn step(&mut self, call: Invocation) -> bool {
        if self.fault.is_some() {
            return false;
        }
        let Some(snapshot) = self.snapshot.take() else {
            return false;
        };
        self.sequence.push_invocation(call);
        let call = &self.sequence.calls()[self.sequence.len() - 1];

        let started = Instant::now();
        let applied = self.adapter.apply(&snapshot, call);
        let elapsed = started.elapsed();

        let transition = match applied {
            Ok(transition) => transition,
            Err(fault) => {
                self.snapshot = Some(snapshot);
                self.fault = Some(fault);
                return false;
            }
        };
        if self.options.call_timeout.is_some_and(|limit| elapsed > limit) {
            self.snapshot = Some(snapshot);
            self.fault = Some(AdapterFault::Timeout {
                operation: call.operation.clone(),
            });
            return false;
        }

        trace!(call = %call, status = transition.status.label(), "applied");
        self.steps.push(StepRecord {
            operation: call.operation.clone(),
            status: transition.status,
            fingerprint: self.adapter.fingerprint(&transition.snapshot),
        });
        self.snapshot = Some(transition.snapshot);

        if self.options.policy == CheckpointPolicy::PerCall {
            self.checkpoint(self.steps.len())
        } else {
            true
        }
    }

    fn checkpoint(&mut self, checkpoint: usize) -> bool {
        let Some(snapshot) = self.snapshot.as_ref() else {
            return false;
        };
        match self.checker.check(self.adapter, snapshot, checkpoint) {
            Ok(newly_violated) => {
                for invariant in newly_violated {
                    debug!(%invariant, checkpoint, "invariant violated");
                }
                true
            }
            Err(fault) => {
                self.fault = Some(fault);
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    pub fn sequence(&self) -> &CallSequence {
        &self.sequence
    }

    pub fn is_faulted(&self) -> bool {
        self.fault.is_some()
    }

    /// True once any invariant has been violated. Always false before
    /// [`Execution::finish`] under the end-of-sequence policy.
    pub fn has_violation(&self) -> bool {
        self.checker
            .outcomes()
            .values()
            .any(|o| matches!(o, InvariantOutcome::Violated { .. }))
    }

    /// Close the execution, running the end-of-sequence checkpoint if that
    /// is the policy.
    pub fn finish(mut self) -> ExecutionResult {
        if self.options.policy == CheckpointPolicy::EndOfSequence && self.fault.is_none() {
            self.checkpoint(self.steps.len());
        }
        let final_state = self
            .snapshot
            .as_ref()
            .map(|s| self.adapter.describe(s))
            .unwrap_or(serde_json::Value::Null);
        ExecutionResult {
            sequence: self.sequence,
            steps: self.steps,
            invariants: self.checker.into_outcomes(),
            fault: self.fault,
            initial_fingerprint: self.initial_fingerprint,
            final_state,
        }
    }
}

/// Execute `sequence` from a fresh instance.
pub fn run<A: SutAdapter>(
    sequence: &CallSequence,
    adapter: &A,
    invariants: &[InvariantSpec],
    options: ExecutionOptions,
) -> ExecutionResult {
    let mut execution = Execution::start(adapter, invariants, options);
    for call in sequence {
        if !execution.step(call.clone()) {
            break;
        }
    }
    execution.finish()
}
