//! The campaign controller.
//!
//! `run` spawns one worker per configured thread on a dedicated rayon
//! pool, then owns every campaign-level decision: it watches the budgets,
//! collects violations, cancels workers, and shrinks the findings once
//! every worker has wound down or [`SHUTDOWN_GRACE`] has passed since
//! cancellation. Workers report over a crossbeam channel and only observe
//! the cancellation token.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::{unbounded, RecvTimeoutError};
use lodestar_explore::cancel::CancelToken;
use lodestar_explore::corpus::Corpus;
use lodestar_explore::error::EngineError;
use lodestar_explore::shrink::Shrinker;
use lodestar_explore::worker::{Finding, Progress, Worker, WorkerContext, WorkerEvent, WorkerStats};
use lodestar_ir::parse::{ConfigError, ParseError};
use lodestar_ir::sequence::CallSequence;
use lodestar_ir::types::{CampaignConfig, InvariantSpec};
use lodestar_model::adapter::SutAdapter;
use lodestar_model::counterexample::Counterexample;
use lodestar_model::executor::ExecutionOptions;
use lodestar_sandbox::sandbox::SandboxError;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::analytics::{AnalyticsSummary, CampaignAnalytics, CampaignPhase, CampaignTimer};
use crate::limits::{fault_rate, LimitViolation, ResourceChecker, ResourceLimits, StopReason};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const COVERAGE_SAMPLE_INTERVAL: Duration = Duration::from_millis(250);
/// How long cancelled workers get to report before their in-flight calls
/// are abandoned.
pub const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, thiserror::Error)]
pub enum CampaignError {
    #[error("invalid config: {0}")]
    Config(#[from] ConfigError),

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("adapter exposes no operations")]
    NoOperations,

    #[error("no invariants to check")]
    NoInvariants,

    #[error("adapter has no predicate for invariant '{0}'")]
    UnknownInvariant(String),

    #[error(
        "{faults} of {sequences} sequences hit adapter faults (rate {rate:.2}); the SUT adapter is likely broken"
    )]
    FaultRateExceeded {
        faults: u64,
        sequences: u64,
        rate: f64,
    },

    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("worker pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("campaign not found: {0}")]
    NotFound(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("limit exceeded: {0}")]
    LimitExceeded(#[from] LimitViolation),
}

/// How a campaign ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CampaignOutcome {
    /// One minimized counterexample per violated invariant.
    Failed { counterexamples: Vec<Counterexample> },
    Exhausted,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CampaignReport {
    #[serde(flatten)]
    pub outcome: CampaignOutcome,
    pub summary: AnalyticsSummary,
}

impl CampaignReport {
    pub fn phase(&self) -> CampaignPhase {
        self.summary.state
    }

    /// The earliest-found counterexample, if any.
    pub fn counterexample(&self) -> Option<&Counterexample> {
        match &self.outcome {
            CampaignOutcome::Failed { counterexamples } => counterexamples.first(),
            _ => None,
        }
    }
}

/// One fuzzing campaign against one adapter.
pub struct Campaign<A: SutAdapter> {
    adapter: Arc<A>,
    invariants: Vec<InvariantSpec>,
    config: CampaignConfig,
    seeds: Vec<CallSequence>,
    cancel: CancelToken,
    progress: Arc<Progress>,
    started: AtomicBool,
}

impl<A: SutAdapter> Campaign<A> {
    /// Validate the config and check the adapter can evaluate every
    /// invariant before anything runs.
    pub fn new(
        adapter: Arc<A>,
        invariants: Vec<InvariantSpec>,
        config: CampaignConfig,
    ) -> Result<Self, CampaignError> {
        config.validate()?;
        if adapter.operations().is_empty() {
            return Err(CampaignError::NoOperations);
        }
        if invariants.is_empty() {
            return Err(CampaignError::NoInvariants);
        }
        if let Some(unknown) = invariants.iter().find(|inv| !adapter.has_invariant(&inv.name)) {
            return Err(CampaignError::UnknownInvariant(unknown.name.clone()));
        }
        Ok(Self {
            adapter,
            invariants,
            config,
            seeds: Vec::new(),
            cancel: CancelToken::new(),
            progress: Arc::new(Progress::default()),
            started: AtomicBool::new(false),
        })
    }

    /// Sequences placed in the corpus before the first worker starts.
    pub fn with_seeds(mut self, seeds: Vec<CallSequence>) -> Self {
        self.seeds = seeds;
        self
    }

    /// Cancelling this token stops the campaign as `Stopped`.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Live counters of the run.
    pub fn progress(&self) -> Arc<Progress> {
        Arc::clone(&self.progress)
    }

    pub fn config(&self) -> &CampaignConfig {
        &self.config
    }

    pub fn invariants(&self) -> &[InvariantSpec] {
        &self.invariants
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    /// Run to completion. Produces exactly one of a failed report with
    /// counterexamples, an exhausted or stopped report, or an error.
    ///
    /// A campaign runs once; a second call is an `InvalidState` error.
    pub fn run(&self) -> Result<CampaignReport, CampaignError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(CampaignError::InvalidState(
                "campaign has already run".to_string(),
            ));
        }
        let config = &self.config;
        let timer = CampaignTimer::start();
        let mut analytics = CampaignAnalytics::new();
        analytics.state = CampaignPhase::Running;
        info!(
            workers = config.worker_count,
            iteration_budget = config.iteration_budget,
            seed = config.seed,
            invariants = self.invariants.len(),
            "campaign started"
        );

        let corpus = Arc::new(Corpus::new(config.max_corpus_entries));
        for seed in &self.seeds {
            seed.validate(self.adapter.operations())
                .map_err(EngineError::from)?;
            corpus.add_seed(seed.clone())?;
        }

        let workers_cancel = CancelToken::new();
        let ctx = WorkerContext {
            adapter: Arc::clone(&self.adapter),
            invariants: Arc::from(self.invariants.clone()),
            config: Arc::new(config.clone()),
            corpus: Arc::clone(&corpus),
            progress: Arc::clone(&self.progress),
            cancel: workers_cancel.clone(),
        };
        let workers = (0..config.worker_count)
            .map(|id| Worker::new(id, ctx.clone()))
            .collect::<Result<Vec<_>, _>>()?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_count)
            .thread_name(|i| format!("lodestar-worker-{i}"))
            .build()?;
        let (tx, rx) = unbounded();
        for (id, worker) in workers.into_iter().enumerate() {
            let tx = tx.clone();
            pool.spawn(move || {
                if let Err(payload) = catch_unwind(AssertUnwindSafe(|| worker.run(&tx))) {
                    let message = panic_message(payload.as_ref());
                    let _ = tx.send(WorkerEvent::Failed {
                        worker: id,
                        error: EngineError::WorkerPanicked { worker: id, message },
                        stats: WorkerStats {
                            worker: id,
                            ..Default::default()
                        },
                    });
                }
            });
        }
        drop(tx);

        let checker = ResourceChecker::new(ResourceLimits::from_config(config));
        let mut findings: BTreeMap<String, Finding> = BTreeMap::new();
        let mut engine_error: Option<EngineError> = None;
        let mut stop: Option<StopReason> = None;
        let mut last_sample = Instant::now();
        let mut cancelled_at: Option<Instant> = None;

        loop {
            if stop.is_none() {
                if self.cancel.is_cancelled() {
                    stop = Some(StopReason::UserAborted);
                } else {
                    stop = checker.check(self.progress.sequences(), self.progress.faults());
                }
                if let Some(reason) = &stop {
                    info!(?reason, "stopping workers");
                    workers_cancel.cancel();
                }
            }

            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(WorkerEvent::Violation(finding))
                    if config.stop_on_first_violation && !findings.is_empty() =>
                {
                    debug!(
                        worker = finding.worker,
                        invariant = %finding.invariant,
                        "violation after the first one ignored"
                    );
                }
                Ok(WorkerEvent::Violation(finding)) => {
                    info!(
                        worker = finding.worker,
                        invariant = %finding.invariant,
                        checkpoint = finding.checkpoint,
                        "violation reported"
                    );
                    findings.entry(finding.invariant.clone()).or_insert(finding);
                    let all_found = findings.len() == self.invariants.len();
                    if config.stop_on_first_violation || all_found {
                        stop.get_or_insert(StopReason::ViolationFound);
                        workers_cancel.cancel();
                    }
                }
                Ok(WorkerEvent::Finished(stats)) => {
                    debug!(worker = stats.worker, sequences = stats.sequences, "worker done");
                    analytics.record_worker(stats);
                }
                Ok(WorkerEvent::Failed { worker, error, stats }) => {
                    error!(worker, %error, "worker failed");
                    analytics.record_worker(stats);
                    engine_error.get_or_insert(error);
                    workers_cancel.cancel();
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            if workers_cancel.is_cancelled() {
                let since = *cancelled_at.get_or_insert_with(Instant::now);
                if since.elapsed() >= SHUTDOWN_GRACE {
                    warn!(
                        reported = analytics.workers.len(),
                        workers = config.worker_count,
                        "abandoning in-flight executions"
                    );
                    break;
                }
            }

            if last_sample.elapsed() >= COVERAGE_SAMPLE_INTERVAL {
                last_sample = Instant::now();
                match corpus.coverage_count() {
                    Ok(points) => analytics.record_coverage(
                        self.progress.sequences(),
                        points,
                        timer.elapsed_secs(),
                    ),
                    Err(e) => {
                        engine_error.get_or_insert(e);
                        workers_cancel.cancel();
                    }
                }
            }
        }

        analytics.set_totals(
            self.progress.sequences(),
            self.progress.calls(),
            self.progress.rejections(),
            self.progress.faults(),
        );
        analytics.record_coverage(
            self.progress.sequences(),
            corpus.coverage_count()?,
            timer.elapsed_secs(),
        );
        analytics.corpus_entries = corpus.len()?;
        analytics.violations_found = findings.len() as u32;

        if let Some(error) = engine_error {
            error!(%error, "campaign halted by engine error");
            return Err(error.into());
        }
        // Workers may spend the whole budget between two polls.
        let (sequences, faults) = (analytics.total_sequences, analytics.total_faults);
        if checker.fault_rate_exceeded(sequences, faults) {
            let rate = fault_rate(faults, sequences);
            warn!(faults, sequences, rate, "adapter fault rate exceeded; aborting campaign");
            return Err(CampaignError::FaultRateExceeded {
                faults,
                sequences,
                rate,
            });
        }

        let outcome = if findings.is_empty() {
            if stop == Some(StopReason::UserAborted) {
                CampaignOutcome::Stopped
            } else {
                CampaignOutcome::Exhausted
            }
        } else {
            CampaignOutcome::Failed {
                counterexamples: self.shrink_all(findings)?,
            }
        };

        let phase = match outcome {
            CampaignOutcome::Failed { .. } => CampaignPhase::Failed,
            CampaignOutcome::Exhausted => CampaignPhase::Exhausted,
            CampaignOutcome::Stopped => CampaignPhase::Stopped,
        };
        analytics.state = phase;
        analytics.set_elapsed(timer.elapsed_secs());
        info!(
            ?phase,
            sequences = analytics.total_sequences,
            coverage = analytics.coverage_points,
            elapsed_secs = analytics.elapsed_secs,
            "campaign finished"
        );
        Ok(CampaignReport {
            outcome,
            summary: analytics.summary(),
        })
    }

    /// Minimize each finding, earliest discovery first.
    fn shrink_all(
        &self,
        findings: BTreeMap<String, Finding>,
    ) -> Result<Vec<Counterexample>, CampaignError> {
        let options = ExecutionOptions::from_config(&self.config);
        let mut ordered: Vec<Finding> = findings.into_values().collect();
        ordered.sort_by_key(|f| (f.iteration, f.worker));

        let mut counterexamples = Vec::with_capacity(ordered.len());
        for finding in ordered {
            let mut shrinker = Shrinker::new(&*self.adapter, options, self.config.max_shrink_attempts);
            let counterexample = shrinker.minimize(&finding.sequence, &finding.invariant)?;
            info!(
                invariant = %counterexample.invariant,
                sequence = %counterexample.sequence,
                checkpoint = counterexample.checkpoint,
                "counterexample"
            );
            counterexamples.push(counterexample);
        }
        Ok(counterexamples)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
