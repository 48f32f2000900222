use serde::{Deserialize, Serialize};

// ── Domains and values ───────────────────────────────────────────────

/// Semantic type of one operation parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Domain {
    Bool,
    /// Integer range, inclusive on both ends. Omitted bounds mean the full `i64` range.
    Int {
        #[serde(default = "i64_min")]
        min: i64,
        #[serde(default = "i64_max")]
        max: i64,
    },
    Enum {
        values: Vec<String>,
    },
    /// Opaque identifier (account, key, handle). Only equality is meaningful.
    Address,
    Bytes {
        max_len: usize,
    },
}

fn i64_min() -> i64 {
    i64::MIN
}

fn i64_max() -> i64 {
    i64::MAX
}

impl Domain {
    pub fn int(min: i64, max: i64) -> Self {
        Domain::Int { min, max }
    }

    pub fn unbounded_int() -> Self {
        Domain::Int {
            min: i64::MIN,
            max: i64::MAX,
        }
    }

    /// Whether `value` is a legal member of this domain.
    pub fn contains(&self, value: &ArgValue) -> bool {
        match (self, value) {
            (Domain::Bool, ArgValue::Bool(_)) => true,
            (Domain::Int { min, max }, ArgValue::Int(v)) => min <= v && v <= max,
            (Domain::Enum { values }, ArgValue::Enum(s)) => values.contains(s),
            (Domain::Address, ArgValue::Address(_)) => true,
            (Domain::Bytes { max_len }, ArgValue::Bytes(b)) => b.len() <= *max_len,
            _ => false,
        }
    }

    /// The element every shrink step moves towards: false, the in-range
    /// integer nearest zero, the first enum variant, address 0, empty bytes.
    ///
    /// Returns `None` only for an enum with no variants.
    pub fn simplest(&self) -> Option<ArgValue> {
        match self {
            Domain::Bool => Some(ArgValue::Bool(false)),
            Domain::Int { min, max } => Some(ArgValue::Int(nearest_zero(*min, *max))),
            Domain::Enum { values } => values.first().cloned().map(ArgValue::Enum),
            Domain::Address => Some(ArgValue::Address(0)),
            Domain::Bytes { .. } => Some(ArgValue::Bytes(Vec::new())),
        }
    }

    /// Distance of `value` from [`Domain::simplest`]. Zero means fully simplified.
    ///
    /// Values outside the domain score `u128::MAX` so no shrink step can
    /// ever prefer them.
    pub fn complexity(&self, value: &ArgValue) -> u128 {
        if !self.contains(value) {
            return u128::MAX;
        }
        match (self, value) {
            (Domain::Bool, ArgValue::Bool(b)) => *b as u128,
            (Domain::Int { min, max }, ArgValue::Int(v)) => {
                let origin = nearest_zero(*min, *max);
                (*v as i128 - origin as i128).unsigned_abs()
            }
            (Domain::Enum { values }, ArgValue::Enum(s)) => {
                values.iter().position(|v| v == s).unwrap_or(0) as u128
            }
            (Domain::Address, ArgValue::Address(a)) => *a as u128,
            (Domain::Bytes { .. }, ArgValue::Bytes(b)) => {
                ((b.len() as u128) << 32) + b.iter().map(|&x| x as u128).sum::<u128>()
            }
            _ => u128::MAX,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Domain::Bool => "bool",
            Domain::Int { .. } => "int",
            Domain::Enum { .. } => "enum",
            Domain::Address => "address",
            Domain::Bytes { .. } => "bytes",
        }
    }
}

/// The value in `[min, max]` with the smallest magnitude.
pub fn nearest_zero(min: i64, max: i64) -> i64 {
    if min <= 0 && 0 <= max {
        0
    } else if min > 0 {
        min
    } else {
        max
    }
}

/// A concrete value drawn from a [`Domain`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ArgValue {
    Bool(bool),
    Int(i64),
    Enum(String),
    Address(u64),
    Bytes(Vec<u8>),
}

impl std::fmt::Display for ArgValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArgValue::Bool(b) => write!(f, "{b}"),
            ArgValue::Int(i) => write!(f, "{i}"),
            ArgValue::Enum(s) => write!(f, "{s}"),
            ArgValue::Address(a) => write!(f, "@{a}"),
            ArgValue::Bytes(b) => {
                write!(f, "0x")?;
                for byte in b {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}

/// A full argument assignment for one operation, in parameter order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallValue(pub Vec<ArgValue>);

impl CallValue {
    pub fn new(args: Vec<ArgValue>) -> Self {
        Self(args)
    }

    pub fn args(&self) -> &[ArgValue] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ArgValue> {
        self.0.get(index)
    }

    /// Integer argument at `index`, if that argument is an integer.
    pub fn int(&self, index: usize) -> Option<i64> {
        match self.0.get(index)? {
            ArgValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn bool(&self, index: usize) -> Option<bool> {
        match self.0.get(index)? {
            ArgValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn address(&self, index: usize) -> Option<u64> {
        match self.0.get(index)? {
            ArgValue::Address(a) => Some(*a),
            _ => None,
        }
    }
}

// ── Operations ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub domain: Domain,
}

impl Param {
    pub fn new(name: &str, domain: Domain) -> Self {
        Self {
            name: name.to_string(),
            domain,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mutability {
    Mutating,
    ReadOnly,
}

/// Immutable descriptor of one callable operation of the system under test.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationSpec {
    pub name: String,
    pub params: Vec<Param>,
    pub mutability: Mutability,
}

/// An argument assignment that does not fit an operation's parameter list.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    #[error("unknown operation '{operation}'")]
    UnknownOperation { operation: String },

    #[error("operation '{operation}' takes {expected} arguments, got {actual}")]
    Arity {
        operation: String,
        expected: usize,
        actual: usize,
    },

    #[error("argument '{param}' of '{operation}' is {value}, outside its {kind} domain")]
    OutOfDomain {
        operation: String,
        param: String,
        value: String,
        kind: &'static str,
    },
}

impl OperationSpec {
    pub fn new(name: &str, params: Vec<Param>, mutability: Mutability) -> Self {
        Self {
            name: name.to_string(),
            params,
            mutability,
        }
    }

    pub fn mutating(name: &str, params: Vec<Param>) -> Self {
        Self::new(name, params, Mutability::Mutating)
    }

    pub fn read_only(name: &str, params: Vec<Param>) -> Self {
        Self::new(name, params, Mutability::ReadOnly)
    }

    pub fn is_mutating(&self) -> bool {
        self.mutability == Mutability::Mutating
    }

    /// Check that `value` conforms to this operation's parameter domains.
    pub fn validate(&self, value: &CallValue) -> Result<(), DomainError> {
        if value.len() != self.params.len() {
            return Err(DomainError::Arity {
                operation: self.name.clone(),
                expected: self.params.len(),
                actual: value.len(),
            });
        }
        for (param, arg) in self.params.iter().zip(value.args()) {
            if !param.domain.contains(arg) {
                return Err(DomainError::OutOfDomain {
                    operation: self.name.clone(),
                    param: param.name.clone(),
                    value: arg.to_string(),
                    kind: param.domain.kind(),
                });
            }
        }
        Ok(())
    }
}

// ── Invariants ───────────────────────────────────────────────────────

/// Declaration of one invariant. The predicate itself is bound by the SUT
/// adapter under `name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InvariantSpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl InvariantSpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }
}

// ── Campaign configuration ───────────────────────────────────────────

/// When invariants are evaluated during sequence execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointPolicy {
    /// After the fresh instance is created and after every call.
    #[default]
    PerCall,
    /// Once, after the last call.
    EndOfSequence,
}

/// Campaign parameters. Every field has a default so a config file only
/// needs to name what it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CampaignConfig {
    /// Parallel worker count.
    pub worker_count: usize,
    /// Maximum sequences executed per worker.
    pub iteration_budget: u64,
    /// Wall-clock ceiling for the whole campaign.
    pub time_budget_secs: u64,
    /// Root of every worker's RNG stream.
    pub seed: u64,
    pub checkpoint_policy: CheckpointPolicy,
    /// Generation ceiling per sequence.
    pub max_sequence_length: usize,
    /// Probability that a worker starts a sequence from a mutated corpus entry.
    pub mutation_probability: f64,
    /// Per-invocation wall-clock bound. Overrun is an adapter fault.
    pub call_timeout_ms: Option<u64>,
    /// Fraction of faulting sequences above which the campaign aborts.
    pub max_fault_rate: f64,
    /// Sequences that must have run before the fault rate is judged.
    pub min_fault_samples: u64,
    /// Bound on shrinker re-executions per counterexample.
    pub max_shrink_attempts: u32,
    /// Stop at the first violation, or keep going to find other invariants' violations.
    pub stop_on_first_violation: bool,
    /// Number of reusable opaque identifiers the value generator favours.
    pub address_pool_size: u64,
    /// Corpus capacity.
    pub max_corpus_entries: usize,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            iteration_budget: 10_000,
            time_budget_secs: 300,
            seed: 42,
            checkpoint_policy: CheckpointPolicy::PerCall,
            max_sequence_length: 16,
            mutation_probability: 0.3,
            call_timeout_ms: None,
            max_fault_rate: 0.5,
            min_fault_samples: 50,
            max_shrink_attempts: 5_000,
            stop_on_first_violation: true,
            address_pool_size: 4,
            max_corpus_entries: 1_024,
        }
    }
}
