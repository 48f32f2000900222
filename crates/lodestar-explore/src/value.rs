//! Argument generation.
//!
//! Integers are drawn from three sources:
//! - **uniform** over the whole domain (the majority of draws);
//! - **boundary** values: min, max, zero, min+1, max-1;
//! - **dictionary** values: adapter constants plus integers observed in
//!   corpus arguments, occasionally nudged by one.
//!
//! Equality-guarded branches (`if x == 5678`) are practically unreachable
//! by uniform sampling alone; the dictionary makes them a handful of draws.

use std::collections::BTreeSet;

use lodestar_ir::types::{nearest_zero, ArgValue, CallValue, Domain, OperationSpec};
use rand::seq::SliceRandom;
use rand::Rng;

/// Percentage of integer draws that sample uniformly.
pub const UNIFORM_PERCENT: u32 = 55;
/// Percentage of integer draws that pick a domain boundary.
pub const BOUNDARY_PERCENT: u32 = 20;
/// Probability that an address draw comes from the reusable pool.
pub const ADDRESS_POOL_BIAS: f64 = 0.85;
/// Cap on generated byte strings, whatever the domain allows.
pub const MAX_GENERATED_BYTES: usize = 64;
/// Cap on remembered corpus integers.
pub const MAX_OBSERVED: usize = 256;

#[derive(Debug, Clone)]
pub struct ValueGenerator {
    dictionary: Vec<i64>,
    observed: Vec<i64>,
    address_pool_size: u64,
}

impl ValueGenerator {
    pub fn new(dictionary: Vec<i64>, address_pool_size: u64) -> Self {
        let dictionary: BTreeSet<i64> = dictionary.into_iter().collect();
        Self {
            dictionary: dictionary.into_iter().collect(),
            observed: Vec::new(),
            address_pool_size,
        }
    }

    /// Replace the integers taken from corpus arguments.
    pub fn set_observed(&mut self, mut values: Vec<i64>) {
        values.truncate(MAX_OBSERVED);
        self.observed = values;
    }

    /// Draw one value from `domain`. `None` only for an enum with no variants.
    pub fn generate<R: Rng>(&self, domain: &Domain, rng: &mut R) -> Option<ArgValue> {
        let value = match domain {
            Domain::Bool => ArgValue::Bool(rng.gen()),
            Domain::Int { min, max } => ArgValue::Int(self.int(*min, *max, rng)),
            Domain::Enum { values } => ArgValue::Enum(values.choose(rng)?.clone()),
            Domain::Address => ArgValue::Address(self.address(rng)),
            Domain::Bytes { max_len } => {
                let len = rng.gen_range(0..=(*max_len).min(MAX_GENERATED_BYTES));
                ArgValue::Bytes((0..len).map(|_| rng.gen()).collect())
            }
        };
        Some(value)
    }

    /// Draw a full argument assignment for `operation`.
    pub fn generate_call<R: Rng>(&self, operation: &OperationSpec, rng: &mut R) -> Option<CallValue> {
        operation
            .params
            .iter()
            .map(|param| self.generate(&param.domain, rng))
            .collect::<Option<Vec<_>>>()
            .map(CallValue::new)
    }

    fn int<R: Rng>(&self, min: i64, max: i64, rng: &mut R) -> i64 {
        if min >= max {
            return min;
        }
        let roll = rng.gen_range(0..100);
        if roll < UNIFORM_PERCENT {
            return rng.gen_range(min..=max);
        }
        if roll >= UNIFORM_PERCENT + BOUNDARY_PERCENT {
            if let Some(v) = self.dictionary_pick(min, max, rng) {
                return v;
            }
        }
        let boundaries = boundaries(min, max);
        boundaries.choose(rng).copied().unwrap_or(min)
    }

    fn dictionary_pick<R: Rng>(&self, min: i64, max: i64, rng: &mut R) -> Option<i64> {
        let source = if self.observed.is_empty() || (!self.dictionary.is_empty() && rng.gen_bool(0.5)) {
            &self.dictionary
        } else {
            &self.observed
        };
        let base = *source.choose(rng)?;
        let value = match rng.gen_range(0..8) {
            0 => base.saturating_add(1),
            1 => base.saturating_sub(1),
            _ => base,
        };
        (min..=max).contains(&value).then_some(value)
    }

    fn address<R: Rng>(&self, rng: &mut R) -> u64 {
        if self.address_pool_size > 0 && rng.gen_bool(ADDRESS_POOL_BIAS) {
            rng.gen_range(0..self.address_pool_size)
        } else {
            rng.gen()
        }
    }
}

/// Edge values of `[min, max]`, deduplicated.
pub fn boundaries(min: i64, max: i64) -> Vec<i64> {
    let candidates = [
        min,
        max,
        nearest_zero(min, max),
        min.saturating_add(1),
        max.saturating_sub(1),
    ];
    let set: BTreeSet<i64> = candidates
        .into_iter()
        .filter(|v| (min..=max).contains(v))
        .collect();
    set.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::worker_rng;
    use lodestar_ir::types::Param;

    #[test]
    fn test_boundaries() {
        assert_eq!(boundaries(-5, 5), vec![-5, -4, 0, 4, 5]);
        assert_eq!(boundaries(3, 4), vec![3, 4]);
        assert_eq!(boundaries(7, 7), vec![7]);
        assert_eq!(
            boundaries(i64::MIN, i64::MAX),
            vec![i64::MIN, i64::MIN + 1, 0, i64::MAX - 1, i64::MAX]
        );
    }

    #[test]
    fn test_values_stay_in_domain() {
        let gen = ValueGenerator::new(vec![-1000, 50, 99, 1_000_000], 4);
        let mut rng = worker_rng(7, 0);
        let domains = [
            Domain::Bool,
            Domain::int(10, 100),
            Domain::int(-3, -1),
            Domain::unbounded_int(),
            Domain::Enum {
                values: vec!["a".into(), "b".into()],
            },
            Domain::Address,
            Domain::Bytes { max_len: 3 },
        ];
        for domain in &domains {
            for _ in 0..500 {
                let v = gen.generate(domain, &mut rng).unwrap();
                assert!(domain.contains(&v), "{v} outside {domain:?}");
            }
        }
    }

    #[test]
    fn test_dictionary_constant_is_drawn_often() {
        let gen = ValueGenerator::new(vec![5678], 4);
        let mut rng = worker_rng(1, 0);
        let hits = (0..1000)
            .filter(|_| gen.generate(&Domain::unbounded_int(), &mut rng) == Some(ArgValue::Int(5678)))
            .count();
        assert!(hits > 100, "only {hits} hits");
    }

    #[test]
    fn test_observed_values_are_used() {
        let mut gen = ValueGenerator::new(vec![], 0);
        gen.set_observed(vec![424_242]);
        let mut rng = worker_rng(3, 0);
        let hit = (0..500).any(|_| {
            gen.generate(&Domain::unbounded_int(), &mut rng) == Some(ArgValue::Int(424_242))
        });
        assert!(hit);
    }

    #[test]
    fn test_addresses_favour_pool() {
        let gen = ValueGenerator::new(vec![], 3);
        let mut rng = worker_rng(9, 0);
        let pooled = (0..1000)
            .filter(|_| matches!(gen.generate(&Domain::Address, &mut rng), Some(ArgValue::Address(a)) if a < 3))
            .count();
        assert!(pooled > 700);
    }

    #[test]
    fn test_empty_enum_has_no_value() {
        let gen = ValueGenerator::new(vec![], 0);
        let mut rng = worker_rng(0, 0);
        let op = OperationSpec::mutating("pick", vec![Param::new("e", Domain::Enum { values: vec![] })]);
        assert!(gen.generate_call(&op, &mut rng).is_none());
    }
}
