use lodestar_ir::sequence::Invocation;
use lodestar_ir::types::{InvariantSpec, OperationSpec};
use serde::{Deserialize, Serialize};

/// How the SUT answered one call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CallStatus {
    Ok,
    /// The SUT refused the call through its own precondition. The state is
    /// left as it was before the call.
    Rejected { reason: String },
}

impl CallStatus {
    pub fn rejected(reason: impl Into<String>) -> Self {
        CallStatus::Rejected {
            reason: reason.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, CallStatus::Ok)
    }

    /// Short label used in coverage points and statistics.
    pub fn label(&self) -> &'static str {
        match self {
            CallStatus::Ok => "ok",
            CallStatus::Rejected { .. } => "rejected",
        }
    }
}

/// Successor snapshot plus the status of the call that produced it.
#[derive(Debug, Clone)]
pub struct Transition<S> {
    pub snapshot: S,
    pub status: CallStatus,
}

/// The SUT became unusable. Fatal for the sequence being executed, never
/// for the campaign on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdapterFault {
    #[error("SUT unreachable: {detail}")]
    Unreachable { detail: String },

    #[error("call to '{operation}' exceeded its time budget")]
    Timeout { operation: String },

    #[error("trap while {context}: {detail}")]
    Trap { context: String, detail: String },

    #[error("SUT state corrupted: {detail}")]
    Corrupted { detail: String },

    #[error("adapter has no operation '{operation}'")]
    UnknownOperation { operation: String },

    #[error("adapter has no predicate for invariant '{invariant}'")]
    UnknownInvariant { invariant: String },
}

/// The capability set the engine needs from a system under test.
///
/// `apply` must be a pure function of `(snapshot, call)`: the snapshot
/// passed in stays valid and unchanged, and nothing outside the snapshot
/// influences the result.
///
/// `apply` must also return in bounded time. The executor measures each
/// call and reports an overrun of its `call_timeout` as
/// [`AdapterFault::Timeout`], but it cannot interrupt a call in progress:
/// adapters bound their own calls, as `WasmSut` does with fuel. A campaign
/// abandons calls still running after it has stopped.
pub trait SutAdapter: Send + Sync + 'static {
    type Snapshot: Clone + Send;

    /// Callable surface, fixed for the adapter's lifetime.
    fn operations(&self) -> &[OperationSpec];

    /// A fresh, default-initialized instance.
    fn new_instance(&self) -> Result<Self::Snapshot, AdapterFault>;

    fn apply(
        &self,
        snapshot: &Self::Snapshot,
        call: &Invocation,
    ) -> Result<Transition<Self::Snapshot>, AdapterFault>;

    /// Evaluate `invariant` against `snapshot`. `true` means it holds.
    fn observe(
        &self,
        snapshot: &Self::Snapshot,
        invariant: &InvariantSpec,
    ) -> Result<bool, AdapterFault>;

    fn has_invariant(&self, name: &str) -> bool;

    /// Integer constants known to matter to this SUT.
    fn dictionary(&self) -> Vec<i64> {
        Vec::new()
    }

    /// Abstract state identity used as a coverage signal. `None` disables
    /// state coverage for this adapter.
    fn fingerprint(&self, _snapshot: &Self::Snapshot) -> Option<u64> {
        None
    }

    /// Observable view of a state, for reports.
    fn describe(&self, _snapshot: &Self::Snapshot) -> serde_json::Value {
        serde_json::Value::Null
    }

    fn operation(&self, name: &str) -> Option<&OperationSpec> {
        self.operations().iter().find(|op| op.name == name)
    }
}
