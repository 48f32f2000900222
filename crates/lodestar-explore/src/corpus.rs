//! Shared corpus of call sequences that reached new coverage.
//!
//! One mutex guards the whole corpus. Workers hold it only to offer or
//! sample a sequence, never while executing one.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard};

use lodestar_ir::sequence::CallSequence;
use lodestar_ir::types::ArgValue;
use lodestar_model::executor::ExecutionResult;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::EngineError;
use crate::value::MAX_OBSERVED;

/// One unit of coverage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CoveragePoint {
    /// An operation completed with the given status label.
    Call { operation: String, status: String },
    /// A state fingerprint reported by the adapter.
    State { fingerprint: u64 },
}

impl CoveragePoint {
    /// Every point an execution touched.
    pub fn collect(result: &ExecutionResult) -> BTreeSet<CoveragePoint> {
        let mut points = BTreeSet::new();
        if let Some(fingerprint) = result.initial_fingerprint {
            points.insert(CoveragePoint::State { fingerprint });
        }
        for step in &result.steps {
            points.insert(CoveragePoint::Call {
                operation: step.operation.clone(),
                status: step.status.label().to_string(),
            });
            if let Some(fingerprint) = step.fingerprint {
                points.insert(CoveragePoint::State { fingerprint });
            }
        }
        points
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusEntry {
    pub id: u64,
    pub sequence: CallSequence,
    /// Points this entry was first to reach.
    pub new_coverage: usize,
    /// Seeds are supplied up front and never evicted.
    pub seed: bool,
    content_hash: u64,
}

/// What happened to an offered sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insertion {
    Added { id: u64, new_points: usize },
    /// Every point was already covered.
    NoNewCoverage,
    /// The same sequence content is already stored.
    Duplicate,
    /// Full of seeds; nothing can be evicted.
    Full,
}

impl Insertion {
    pub fn is_added(&self) -> bool {
        matches!(self, Insertion::Added { .. })
    }
}

#[derive(Debug, Default)]
struct CorpusInner {
    entries: VecDeque<CorpusEntry>,
    hashes: HashSet<u64>,
    coverage: HashSet<CoveragePoint>,
    observed: BTreeSet<i64>,
    next_id: u64,
}

#[derive(Debug)]
pub struct Corpus {
    inner: Mutex<CorpusInner>,
    capacity: usize,
}

fn content_hash(sequence: &CallSequence) -> u64 {
    let mut hasher = DefaultHasher::new();
    sequence.hash(&mut hasher);
    hasher.finish()
}

impl Corpus {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CorpusInner::default()),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, CorpusInner>, EngineError> {
        self.inner.lock().map_err(|_| EngineError::CorpusPoisoned)
    }

    /// Add a known-interesting sequence regardless of coverage.
    pub fn add_seed(&self, sequence: CallSequence) -> Result<Insertion, EngineError> {
        let mut inner = self.lock()?;
        let hash = content_hash(&sequence);
        if inner.hashes.contains(&hash) {
            return Ok(Insertion::Duplicate);
        }
        if inner.entries.len() >= self.capacity && !evict_oldest(&mut inner) {
            return Ok(Insertion::Full);
        }
        Ok(insert(&mut inner, sequence, hash, 0, true))
    }

    /// Insert `sequence` if it reached at least one uncovered point.
    ///
    /// The coverage check and the insertion happen under one lock, so two
    /// workers offering the same discovery store it once.
    pub fn offer(
        &self,
        sequence: &CallSequence,
        coverage: &BTreeSet<CoveragePoint>,
    ) -> Result<Insertion, EngineError> {
        let mut inner = self.lock()?;
        let new_points: Vec<&CoveragePoint> = coverage
            .iter()
            .filter(|p| !inner.coverage.contains(*p))
            .collect();
        if new_points.is_empty() {
            return Ok(Insertion::NoNewCoverage);
        }
        let hash = content_hash(sequence);
        if inner.hashes.contains(&hash) {
            return Ok(Insertion::Duplicate);
        }
        if inner.entries.len() >= self.capacity && !evict_oldest(&mut inner) {
            return Ok(Insertion::Full);
        }

        let count = new_points.len();
        let new_points: Vec<CoveragePoint> = new_points.into_iter().cloned().collect();
        inner.coverage.extend(new_points);
        let insertion = insert(&mut inner, sequence.clone(), hash, count, false);
        debug!(
            entries = inner.entries.len(),
            coverage = inner.coverage.len(),
            new_points = count,
            "corpus grew"
        );
        Ok(insertion)
    }

    /// A uniformly chosen entry's sequence, or `None` when empty.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> Result<Option<(u64, CallSequence)>, EngineError> {
        let inner = self.lock()?;
        if inner.entries.is_empty() {
            return Ok(None);
        }
        let index = rng.gen_range(0..inner.entries.len());
        let Some(entry) = inner.entries.get(index) else {
            return Ok(None);
        };
        if content_hash(&entry.sequence) != entry.content_hash {
            return Err(EngineError::CorruptCorpusEntry {
                id: entry.id,
                detail: "content hash mismatch".to_string(),
            });
        }
        Ok(Some((entry.id, entry.sequence.clone())))
    }

    /// Integer arguments seen in stored sequences.
    pub fn observed_values(&self) -> Result<Vec<i64>, EngineError> {
        Ok(self.lock()?.observed.iter().copied().collect())
    }

    pub fn len(&self) -> Result<usize, EngineError> {
        Ok(self.lock()?.entries.len())
    }

    pub fn is_empty(&self) -> Result<bool, EngineError> {
        Ok(self.lock()?.entries.is_empty())
    }

    /// Distinct coverage points reached by any offered sequence.
    pub fn coverage_count(&self) -> Result<usize, EngineError> {
        Ok(self.lock()?.coverage.len())
    }

    pub fn entries(&self) -> Result<Vec<CorpusEntry>, EngineError> {
        Ok(self.lock()?.entries.iter().cloned().collect())
    }
}

fn insert(
    inner: &mut CorpusInner,
    sequence: CallSequence,
    hash: u64,
    new_coverage: usize,
    seed: bool,
) -> Insertion {
    let id = inner.next_id;
    inner.next_id += 1;
    for call in &sequence {
        for arg in call.args.args() {
            if let ArgValue::Int(v) = arg {
                if inner.observed.len() < MAX_OBSERVED {
                    inner.observed.insert(*v);
                }
            }
        }
    }
    inner.hashes.insert(hash);
    inner.entries.push_back(CorpusEntry {
        id,
        sequence,
        new_coverage,
        seed,
        content_hash: hash,
    });
    Insertion::Added {
        id,
        new_points: new_coverage,
    }
}

/// Drop the oldest non-seed entry. Coverage it reached stays recorded.
fn evict_oldest(inner: &mut CorpusInner) -> bool {
    let Some(index) = inner.entries.iter().position(|e| !e.seed) else {
        return false;
    };
    if let Some(evicted) = inner.entries.remove(index) {
        inner.hashes.remove(&evicted.content_hash);
    }
    true
}
