//! In-process SUT built from plain Rust closures.
//!
//! State is any `Clone + Hash + Serialize` value. Each `apply` clones the
//! state before handing it to the operation, so snapshots held by the
//! caller are never touched.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use lodestar_ir::sequence::Invocation;
use lodestar_ir::types::{CallValue, InvariantSpec, OperationSpec};
use serde::Serialize;

use crate::adapter::{AdapterFault, CallStatus, SutAdapter, Transition};

/// Why a model operation did not complete normally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpError {
    /// Precondition failed; the call reverts.
    Reject(String),
    /// The model itself is broken. Surfaces as an adapter fault.
    Corrupt(String),
}

impl OpError {
    pub fn reject(reason: impl Into<String>) -> Self {
        OpError::Reject(reason.into())
    }

    pub fn corrupt(detail: impl Into<String>) -> Self {
        OpError::Corrupt(detail.into())
    }
}

type OperationFn<S> = Arc<dyn Fn(&mut S, &CallValue) -> Result<(), OpError> + Send + Sync>;
type PredicateFn<S> = Arc<dyn Fn(&S) -> bool + Send + Sync>;

pub struct ModelSut<S> {
    initial: Arc<S>,
    operations: Vec<OperationSpec>,
    handlers: HashMap<String, OperationFn<S>>,
    invariants: BTreeMap<String, PredicateFn<S>>,
    dictionary: Vec<i64>,
    state_coverage: bool,
}

pub struct ModelSutBuilder<S> {
    initial: S,
    operations: Vec<OperationSpec>,
    handlers: HashMap<String, OperationFn<S>>,
    invariants: BTreeMap<String, PredicateFn<S>>,
    dictionary: Vec<i64>,
    state_coverage: bool,
}

impl<S> ModelSut<S>
where
    S: Clone + Hash + Serialize + Send + Sync + 'static,
{
    pub fn builder(initial: S) -> ModelSutBuilder<S> {
        ModelSutBuilder {
            initial,
            operations: Vec::new(),
            handlers: HashMap::new(),
            invariants: BTreeMap::new(),
            dictionary: Vec::new(),
            state_coverage: false,
        }
    }

    /// Names of every bound invariant, sorted.
    pub fn invariant_names(&self) -> Vec<&str> {
        self.invariants.keys().map(|s| s.as_str()).collect()
    }

    /// Declarations for every bound invariant.
    pub fn invariant_specs(&self) -> Vec<InvariantSpec> {
        self.invariants.keys().map(|name| InvariantSpec::new(name)).collect()
    }
}

impl<S> ModelSutBuilder<S>
where
    S: Clone + Hash + Serialize + Send + Sync + 'static,
{
    /// Bind an operation. Registering a name twice replaces the first binding.
    pub fn operation<F>(mut self, spec: OperationSpec, handler: F) -> Self
    where
        F: Fn(&mut S, &CallValue) -> Result<(), OpError> + Send + Sync + 'static,
    {
        self.operations.retain(|op| op.name != spec.name);
        self.handlers.insert(spec.name.clone(), Arc::new(handler));
        self.operations.push(spec);
        self
    }

    pub fn invariant<F>(mut self, name: &str, predicate: F) -> Self
    where
        F: Fn(&S) -> bool + Send + Sync + 'static,
    {
        self.invariants.insert(name.to_string(), Arc::new(predicate));
        self
    }

    /// Constants the value generator should try.
    pub fn dictionary<I: IntoIterator<Item = i64>>(mut self, values: I) -> Self {
        self.dictionary.extend(values);
        self
    }

    /// Report a hash of the whole state as a coverage fingerprint.
    pub fn state_coverage(mut self) -> Self {
        self.state_coverage = true;
        self
    }

    pub fn build(self) -> ModelSut<S> {
        ModelSut {
            initial: Arc::new(self.initial),
            operations: self.operations,
            handlers: self.handlers,
            invariants: self.invariants,
            dictionary: self.dictionary,
            state_coverage: self.state_coverage,
        }
    }
}

impl<S> SutAdapter for ModelSut<S>
where
    S: Clone + Hash + Serialize + Send + Sync + 'static,
{
    type Snapshot = Arc<S>;

    fn operations(&self) -> &[OperationSpec] {
        &self.operations
    }

    fn new_instance(&self) -> Result<Arc<S>, AdapterFault> {
        Ok(Arc::new((*self.initial).clone()))
    }

    fn apply(&self, snapshot: &Arc<S>, call: &Invocation) -> Result<Transition<Arc<S>>, AdapterFault> {
        let handler =
            self.handlers
                .get(&call.operation)
                .ok_or_else(|| AdapterFault::UnknownOperation {
                    operation: call.operation.clone(),
                })?;

        let mut next = (**snapshot).clone();
        match handler(&mut next, &call.args) {
            Ok(()) => Ok(Transition {
                snapshot: Arc::new(next),
                status: CallStatus::Ok,
            }),
            Err(OpError::Reject(reason)) => Ok(Transition {
                snapshot: Arc::clone(snapshot),
                status: CallStatus::Rejected { reason },
            }),
            Err(OpError::Corrupt(detail)) => Err(AdapterFault::Corrupted { detail }),
        }
    }

    fn observe(&self, snapshot: &Arc<S>, invariant: &InvariantSpec) -> Result<bool, AdapterFault> {
        let predicate =
            self.invariants
                .get(&invariant.name)
                .ok_or_else(|| AdapterFault::UnknownInvariant {
                    invariant: invariant.name.clone(),
                })?;
        Ok(predicate(snapshot))
    }

    fn has_invariant(&self, name: &str) -> bool {
        self.invariants.contains_key(name)
    }

    fn dictionary(&self) -> Vec<i64> {
        self.dictionary.clone()
    }

    fn fingerprint(&self, snapshot: &Arc<S>) -> Option<u64> {
        if !self.state_coverage {
            return None;
        }
        let mut hasher = DefaultHasher::new();
        snapshot.hash(&mut hasher);
        Some(hasher.finish())
    }

    fn describe(&self, snapshot: &Arc<S>) -> serde_json::Value {
        serde_json::to_value(&**snapshot).unwrap_or(serde_json::Value::Null)
    }
}
