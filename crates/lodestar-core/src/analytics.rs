//! Campaign analytics and telemetry.
//!
//! Tracks the coverage curve, per-worker statistics and aggregate counters
//! for campaign-level observability. A summary is attached to every
//! campaign report.

use std::time::Instant;

use lodestar_explore::worker::WorkerStats;
use serde::{Deserialize, Serialize};

use crate::limits::fault_rate;

/// Coverage reached after a number of sequences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageSample {
    /// Sequences executed across all workers when this was taken.
    pub sequences: u64,
    /// Distinct coverage points in the corpus.
    pub points: usize,
    pub elapsed_secs: f64,
}

/// Campaign lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignPhase {
    Idle,
    Running,
    /// Budget consumed with no violation.
    Exhausted,
    /// A counterexample was found.
    Failed,
    /// Cancelled from outside.
    Stopped,
    /// Fatal engine or configuration error.
    Errored,
}

impl CampaignPhase {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CampaignPhase::Idle | CampaignPhase::Running)
    }
}

/// Campaign-level analytics aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignAnalytics {
    pub coverage_curve: Vec<CoverageSample>,
    /// Final statistics of each worker, by worker id.
    pub workers: Vec<WorkerStats>,
    pub total_sequences: u64,
    pub total_calls: u64,
    pub total_rejections: u64,
    pub total_faults: u64,
    /// Distinct invariants found violated.
    pub violations_found: u32,
    pub corpus_entries: usize,
    pub coverage_points: usize,
    pub elapsed_secs: f64,
    pub state: CampaignPhase,
}

impl CampaignAnalytics {
    pub fn new() -> Self {
        Self {
            coverage_curve: Vec::new(),
            workers: Vec::new(),
            total_sequences: 0,
            total_calls: 0,
            total_rejections: 0,
            total_faults: 0,
            violations_found: 0,
            corpus_entries: 0,
            coverage_points: 0,
            elapsed_secs: 0.0,
            state: CampaignPhase::Idle,
        }
    }

    /// Record a coverage measurement. Samples that add nothing are skipped.
    pub fn record_coverage(&mut self, sequences: u64, points: usize, elapsed_secs: f64) {
        if let Some(last) = self.coverage_curve.last() {
            if last.sequences == sequences && last.points == points {
                return;
            }
        }
        self.coverage_curve.push(CoverageSample {
            sequences,
            points,
            elapsed_secs,
        });
        self.coverage_points = self.coverage_points.max(points);
    }

    pub fn record_worker(&mut self, stats: WorkerStats) {
        let at = self.workers.partition_point(|w| w.worker < stats.worker);
        self.workers.insert(at, stats);
    }

    pub fn set_totals(&mut self, sequences: u64, calls: u64, rejections: u64, faults: u64) {
        self.total_sequences = sequences;
        self.total_calls = calls;
        self.total_rejections = rejections;
        self.total_faults = faults;
    }

    pub fn set_elapsed(&mut self, secs: f64) {
        self.elapsed_secs = secs;
    }

    pub fn fault_rate(&self) -> f64 {
        fault_rate(self.total_faults, self.total_sequences)
    }

    pub fn sequences_per_sec(&self) -> f64 {
        if self.elapsed_secs <= 0.0 {
            0.0
        } else {
            self.total_sequences as f64 / self.elapsed_secs
        }
    }

    /// Coverage points gained per 1000 sequences over the whole curve.
    pub fn coverage_velocity(&self) -> f64 {
        let (Some(first), Some(last)) = (self.coverage_curve.first(), self.coverage_curve.last())
        else {
            return 0.0;
        };
        let sequences = last.sequences.saturating_sub(first.sequences);
        if sequences == 0 {
            return 0.0;
        }
        let gained = last.points.saturating_sub(first.points) as f64;
        gained / sequences as f64 * 1000.0
    }

    pub fn summary(&self) -> AnalyticsSummary {
        AnalyticsSummary {
            total_sequences: self.total_sequences,
            total_calls: self.total_calls,
            total_rejections: self.total_rejections,
            total_faults: self.total_faults,
            fault_rate: self.fault_rate(),
            violations_found: self.violations_found,
            corpus_entries: self.corpus_entries,
            coverage_points: self.coverage_points,
            coverage_velocity: self.coverage_velocity(),
            sequences_per_sec: self.sequences_per_sec(),
            elapsed_secs: self.elapsed_secs,
            state: self.state,
            workers: self.workers.clone(),
        }
    }
}

impl Default for CampaignAnalytics {
    fn default() -> Self {
        Self::new()
    }
}

/// Compact analytics summary attached to campaign reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsSummary {
    pub total_sequences: u64,
    pub total_calls: u64,
    pub total_rejections: u64,
    pub total_faults: u64,
    pub fault_rate: f64,
    pub violations_found: u32,
    pub corpus_entries: usize,
    pub coverage_points: usize,
    pub coverage_velocity: f64,
    pub sequences_per_sec: f64,
    pub elapsed_secs: f64,
    pub state: CampaignPhase,
    pub workers: Vec<WorkerStats>,
}

/// A simple wall-clock timer for campaign duration.
#[derive(Debug)]
pub struct CampaignTimer {
    start: Instant,
}

impl CampaignTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_analytics_is_empty() {
        let a = CampaignAnalytics::new();
        assert_eq!(a.total_sequences, 0);
        assert_eq!(a.violations_found, 0);
        assert_eq!(a.state, CampaignPhase::Idle);
        assert!(!a.state.is_terminal());
    }

    #[test]
    fn test_coverage_curve_skips_repeats() {
        let mut a = CampaignAnalytics::new();
        a.record_coverage(0, 1, 0.0);
        a.record_coverage(0, 1, 0.1);
        a.record_coverage(500, 6, 0.5);

        assert_eq!(a.coverage_curve.len(), 2);
        assert_eq!(a.coverage_points, 6);
        // 5 points over 500 sequences.
        assert!((a.coverage_velocity() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_workers_kept_in_id_order() {
        let mut a = CampaignAnalytics::new();
        for id in [2, 0, 1] {
            a.record_worker(WorkerStats {
                worker: id,
                ..Default::default()
            });
        }
        let ids: Vec<usize> = a.workers.iter().map(|w| w.worker).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn test_rates() {
        let mut a = CampaignAnalytics::new();
        a.set_totals(1000, 8000, 40, 250);
        a.set_elapsed(4.0);
        assert!((a.fault_rate() - 0.25).abs() < 1e-9);
        assert!((a.sequences_per_sec() - 250.0).abs() < 1e-9);
    }

    #[test]
    fn test_summary_generation() {
        let mut a = CampaignAnalytics::new();
        a.set_totals(10_000, 50_000, 12, 0);
        a.violations_found = 1;
        a.state = CampaignPhase::Failed;

        let s = a.summary();
        assert_eq!(s.total_sequences, 10_000);
        assert_eq!(s.violations_found, 1);
        assert_eq!(s.state, CampaignPhase::Failed);
        assert!(s.state.is_terminal());
    }

    #[test]
    fn test_zero_rates() {
        let a = CampaignAnalytics::new();
        assert_eq!(a.fault_rate(), 0.0);
        assert_eq!(a.sequences_per_sec(), 0.0);
        assert_eq!(a.coverage_velocity(), 0.0);
    }
}
