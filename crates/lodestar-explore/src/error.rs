use lodestar_ir::types::DomainError;

/// Engine bugs. Always fatal to the campaign: a corrupted corpus or an
/// out-of-domain generator would otherwise produce misleading results.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("generator produced an invalid call: {0}")]
    OutOfDomain(#[from] DomainError),

    #[error("adapter exposes no operations")]
    NoOperations,

    #[error("operation '{operation}' has a parameter domain with no values")]
    EmptyDomain { operation: String },

    #[error("corpus lock poisoned by a panicking worker")]
    CorpusPoisoned,

    #[error("corpus entry {id} is corrupt: {detail}")]
    CorruptCorpusEntry { id: u64, detail: String },

    #[error("counterexample for '{invariant}' did not reproduce: {detail}")]
    NonDeterministic { invariant: String, detail: String },

    #[error("worker {worker} panicked: {message}")]
    WorkerPanicked { worker: usize, message: String },
}
