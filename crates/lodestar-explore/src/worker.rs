//! The per-worker exploration loop.
//!
//! A worker owns its RNG, operation weights and in-progress sequence, and
//! shares only the corpus. Each iteration either extends an empty sequence
//! or starts from a mutated corpus entry, executes it call by call, and
//! hands the result to the campaign controller as [`WorkerEvent`]s.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::channel::Sender;
use lodestar_ir::sequence::CallSequence;
use lodestar_ir::types::{CampaignConfig, InvariantSpec};
use lodestar_model::adapter::SutAdapter;
use lodestar_model::executor::{Execution, ExecutionOptions, ExecutionResult};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::corpus::{Corpus, CoveragePoint};
use crate::error::EngineError;
use crate::generator::CallGenerator;
use crate::rng::worker_rng;
use crate::value::ValueGenerator;

/// Sequences per weight-decay epoch.
pub const EPOCH_SEQUENCES: u64 = 64;

/// Everything a worker borrows from its campaign.
pub struct WorkerContext<A: SutAdapter> {
    pub adapter: Arc<A>,
    pub invariants: Arc<[InvariantSpec]>,
    pub config: Arc<CampaignConfig>,
    pub corpus: Arc<Corpus>,
    pub progress: Arc<Progress>,
    pub cancel: CancelToken,
}

impl<A: SutAdapter> Clone for WorkerContext<A> {
    fn clone(&self) -> Self {
        Self {
            adapter: Arc::clone(&self.adapter),
            invariants: Arc::clone(&self.invariants),
            config: Arc::clone(&self.config),
            corpus: Arc::clone(&self.corpus),
            progress: Arc::clone(&self.progress),
            cancel: self.cancel.clone(),
        }
    }
}

/// Campaign-wide counters, updated by every worker after each sequence.
#[derive(Debug, Default)]
pub struct Progress {
    sequences: AtomicU64,
    calls: AtomicU64,
    rejections: AtomicU64,
    faults: AtomicU64,
}

impl Progress {
    pub fn record(&self, calls: u64, rejections: u64, faulted: bool) {
        self.sequences.fetch_add(1, Ordering::Relaxed);
        self.calls.fetch_add(calls, Ordering::Relaxed);
        self.rejections.fetch_add(rejections, Ordering::Relaxed);
        if faulted {
            self.faults.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn sequences(&self) -> u64 {
        self.sequences.load(Ordering::Relaxed)
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn rejections(&self) -> u64 {
        self.rejections.load(Ordering::Relaxed)
    }

    pub fn faults(&self) -> u64 {
        self.faults.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStats {
    pub worker: usize,
    pub sequences: u64,
    pub calls: u64,
    pub rejections: u64,
    pub faults: u64,
    pub violations: u64,
    pub corpus_additions: u64,
    /// Sequences that started from a mutated corpus entry.
    pub mutated_starts: u64,
}

/// A sequence that falsified an invariant, before shrinking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub worker: usize,
    /// Worker iteration that produced it.
    pub iteration: u64,
    pub invariant: String,
    pub checkpoint: usize,
    pub sequence: CallSequence,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    Violation(Finding),
    Finished(WorkerStats),
    Failed {
        worker: usize,
        error: EngineError,
        stats: WorkerStats,
    },
}

pub struct Worker<A: SutAdapter> {
    id: usize,
    ctx: WorkerContext<A>,
    rng: ChaCha8Rng,
    generator: CallGenerator,
    /// Invariants this worker has not yet seen violated.
    active: Vec<InvariantSpec>,
    options: ExecutionOptions,
    stats: WorkerStats,
}

impl<A: SutAdapter> Worker<A> {
    pub fn new(id: usize, ctx: WorkerContext<A>) -> Result<Self, EngineError> {
        let values = ValueGenerator::new(ctx.adapter.dictionary(), ctx.config.address_pool_size);
        let generator = CallGenerator::new(ctx.adapter.operations(), values)?;
        Ok(Self {
            id,
            rng: worker_rng(ctx.config.seed, id as u64),
            generator,
            active: ctx.invariants.to_vec(),
            options: ExecutionOptions::from_config(&ctx.config),
            stats: WorkerStats {
                worker: id,
                ..Default::default()
            },
            ctx,
        })
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// Run until the iteration budget is spent, the campaign is cancelled,
    /// or every invariant has been seen violated. Always ends with a
    /// `Finished` or `Failed` event.
    pub fn run(mut self, events: &Sender<WorkerEvent>) -> WorkerStats {
        debug!(worker = self.id, "worker started");
        let event = match self.explore(events) {
            Ok(()) => WorkerEvent::Finished(self.stats.clone()),
            Err(error) => {
                warn!(worker = self.id, %error, "worker stopped by engine error");
                WorkerEvent::Failed {
                    worker: self.id,
                    error,
                    stats: self.stats.clone(),
                }
            }
        };
        debug!(worker = self.id, sequences = self.stats.sequences, "worker finished");
        let _ = events.send(event);
        self.stats
    }

    fn explore(&mut self, events: &Sender<WorkerEvent>) -> Result<(), EngineError> {
        for iteration in 0..self.ctx.config.iteration_budget {
            if self.ctx.cancel.is_cancelled() || self.active.is_empty() {
                break;
            }
            let result = self.run_sequence()?;
            self.absorb(iteration, result, events)?;

            if self.stats.sequences % EPOCH_SEQUENCES == 0 {
                self.generator.end_epoch();
                let observed = self.ctx.corpus.observed_values()?;
                self.generator.values_mut().set_observed(observed);
            }
        }
        Ok(())
    }

    /// Generate and execute one sequence.
    pub fn run_sequence(&mut self) -> Result<ExecutionResult, EngineError> {
        let max_len = self.ctx.config.max_sequence_length.max(1);
        let prefix = self.starting_point()?;
        let target = self.rng.gen_range(1..=max_len);

        let adapter = Arc::clone(&self.ctx.adapter);
        let mut execution = Execution::start(&*adapter, &self.active, self.options);

        for call in prefix.iter().take(max_len) {
            if !execution.step(call.clone()) || execution.has_violation() {
                return Ok(execution.finish());
            }
        }
        while execution.len() < target && !execution.is_faulted() && !execution.has_violation() {
            let call = self.generator.extend(execution.sequence(), &mut self.rng)?;
            if let Some(spec) = self
                .generator
                .operations()
                .iter()
                .find(|op| op.name == call.operation)
            {
                spec.validate(&call.args)?;
            }
            if !execution.step(call) {
                break;
            }
        }
        Ok(execution.finish())
    }

    /// A mutated corpus entry, or an empty sequence.
    fn starting_point(&mut self) -> Result<CallSequence, EngineError> {
        let probability = self.ctx.config.mutation_probability.clamp(0.0, 1.0);
        if !self.rng.gen_bool(probability) {
            return Ok(CallSequence::new());
        }
        let Some((id, entry)) = self.ctx.corpus.sample(&mut self.rng)? else {
            return Ok(CallSequence::new());
        };
        entry
            .validate(self.generator.operations())
            .map_err(|e| EngineError::CorruptCorpusEntry {
                id,
                detail: e.to_string(),
            })?;
        let (mutation, mutated) = self.generator.mutate(&entry, &mut self.rng);
        mutated.validate(self.generator.operations())?;
        self.stats.mutated_starts += 1;
        tracing::trace!(worker = self.id, entry = id, ?mutation, "starting from corpus");
        Ok(mutated)
    }

    fn absorb(
        &mut self,
        iteration: u64,
        result: ExecutionResult,
        events: &Sender<WorkerEvent>,
    ) -> Result<(), EngineError> {
        let calls = result.steps.len() as u64;
        let rejections = result.rejected_calls() as u64;
        self.stats.sequences += 1;
        self.stats.calls += calls;
        self.stats.rejections += rejections;
        self.ctx.progress.record(calls, rejections, result.is_fault());

        if let Some(fault) = &result.fault {
            self.stats.faults += 1;
            warn!(worker = self.id, %fault, sequence = %result.sequence, "adapter fault; sequence discarded");
        }

        let violations: Vec<(String, usize)> = result
            .violations()
            .into_iter()
            .map(|(name, checkpoint)| (name.to_string(), checkpoint))
            .collect();
        for (invariant, checkpoint) in &violations {
            self.stats.violations += 1;
            info!(worker = self.id, %invariant, checkpoint, sequence = %result.sequence, "invariant violated");
            self.active.retain(|inv| &inv.name != invariant);
            let _ = events.send(WorkerEvent::Violation(Finding {
                worker: self.id,
                iteration,
                invariant: invariant.clone(),
                checkpoint: *checkpoint,
                sequence: result.sequence.clone(),
            }));
        }

        if violations.is_empty() && !result.is_fault() {
            let coverage = CoveragePoint::collect(&result);
            if self.ctx.corpus.offer(&result.sequence, &coverage)?.is_added() {
                self.stats.corpus_additions += 1;
                self.generator.reward(&result.sequence);
            }
        }
        Ok(())
    }
}
