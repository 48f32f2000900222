use std::collections::HashMap;

use lodestar_ir::types::OperationSpec;
use rand::Rng;

/// Default weight of a state-mutating operation.
pub const MUTATING_WEIGHT: f64 = 1.0;
/// Read-only calls cannot build state, so they are picked less often.
pub const READ_ONLY_WEIGHT: f64 = 0.25;
/// Multiplier applied to operations of a sequence that gained coverage.
pub const COVERAGE_BOOST: f64 = 1.5;
/// Ceiling on any weight, so one operation cannot starve the rest.
pub const MAX_WEIGHT: f64 = 8.0;
/// Per-epoch pull of every weight back toward its default.
pub const EPOCH_DECAY: f64 = 0.9;

/// Per-worker operation weights.
///
/// Operations appearing in sequences that produced new coverage are
/// boosted; each epoch every weight decays toward its default so early
/// luck does not fixate the search.
#[derive(Debug, Clone)]
pub struct WeightTable {
    weights: HashMap<String, f64>,
    defaults: HashMap<String, f64>,
}

impl WeightTable {
    pub fn new(operations: &[OperationSpec]) -> Self {
        let defaults: HashMap<String, f64> = operations
            .iter()
            .map(|op| {
                let weight = if op.is_mutating() {
                    MUTATING_WEIGHT
                } else {
                    READ_ONLY_WEIGHT
                };
                (op.name.clone(), weight)
            })
            .collect();
        Self {
            weights: HashMap::new(),
            defaults,
        }
    }

    pub fn get(&self, operation: &str) -> f64 {
        if let Some(&w) = self.weights.get(operation) {
            w
        } else {
            self.defaults.get(operation).copied().unwrap_or(MUTATING_WEIGHT)
        }
    }

    pub fn set(&mut self, operation: &str, weight: f64) {
        self.weights
            .insert(operation.to_string(), weight.clamp(0.0, MAX_WEIGHT));
    }

    /// Adjust a weight by a multiplier.
    pub fn adjust(&mut self, operation: &str, multiplier: f64) {
        let current = self.get(operation);
        self.set(operation, current * multiplier);
    }

    /// Boost each distinct operation in `operations` once.
    pub fn reward<'a, I: IntoIterator<Item = &'a str>>(&mut self, operations: I) {
        let mut seen = std::collections::HashSet::new();
        for op in operations {
            if seen.insert(op) {
                self.adjust(op, COVERAGE_BOOST);
            }
        }
    }

    /// Pull every adjusted weight toward its default:
    /// `w' = default + (w - default) * factor`.
    pub fn decay_all(&mut self, factor: f64) {
        for (op, weight) in self.weights.iter_mut() {
            let default = self.defaults.get(op).copied().unwrap_or(MUTATING_WEIGHT);
            *weight = default + (*weight - default) * factor;
        }
    }

    /// Weighted choice among `operations`. Returns an index into the slice,
    /// or `None` when it is empty.
    pub fn pick<R: Rng>(&self, operations: &[OperationSpec], rng: &mut R) -> Option<usize> {
        if operations.is_empty() {
            return None;
        }
        let weights: Vec<f64> = operations
            .iter()
            .map(|op| self.get(&op.name).max(0.0))
            .collect();
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return Some(rng.gen_range(0..operations.len()));
        }

        let mut roll: f64 = rng.gen::<f64>() * total;
        for (i, &weight) in weights.iter().enumerate() {
            roll -= weight;
            if roll <= 0.0 {
                return Some(i);
            }
        }
        Some(operations.len() - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::worker_rng;

    fn ops() -> Vec<OperationSpec> {
        vec![
            OperationSpec::mutating("write", vec![]),
            OperationSpec::read_only("read", vec![]),
        ]
    }

    #[test]
    fn test_defaults_by_mutability() {
        let table = WeightTable::new(&ops());
        assert_eq!(table.get("write"), MUTATING_WEIGHT);
        assert_eq!(table.get("read"), READ_ONLY_WEIGHT);
        assert_eq!(table.get("unknown"), MUTATING_WEIGHT);
    }

    #[test]
    fn test_reward_boosts_once_per_operation() {
        let mut table = WeightTable::new(&ops());
        table.reward(["write", "write", "read"]);
        assert!((table.get("write") - COVERAGE_BOOST).abs() < 1e-9);
        assert!((table.get("read") - READ_ONLY_WEIGHT * COVERAGE_BOOST).abs() < 1e-9);
    }

    #[test]
    fn test_weights_capped() {
        let mut table = WeightTable::new(&ops());
        for _ in 0..50 {
            table.adjust("write", 2.0);
        }
        assert_eq!(table.get("write"), MAX_WEIGHT);
    }

    #[test]
    fn test_decay_returns_toward_default() {
        let mut table = WeightTable::new(&ops());
        table.set("write", 5.0);
        table.decay_all(0.5);
        assert!((table.get("write") - 3.0).abs() < 1e-9);
        for _ in 0..60 {
            table.decay_all(0.5);
        }
        assert!((table.get("write") - MUTATING_WEIGHT).abs() < 1e-6);
    }

    #[test]
    fn test_pick_respects_weights() {
        let mut table = WeightTable::new(&ops());
        table.set("read", 0.0);
        let ops = ops();
        let mut rng = worker_rng(5, 0);
        for _ in 0..200 {
            assert_eq!(table.pick(&ops, &mut rng), Some(0));
        }
        assert_eq!(table.pick(&[], &mut rng), None);
    }
}
