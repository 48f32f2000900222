//! Execution side of the engine: the SUT adapter contract, an in-process
//! model SUT, the sequence executor and the invariant checker.

pub mod adapter;
pub mod counterexample;
pub mod executor;
pub mod invariant;
pub mod model_sut;
