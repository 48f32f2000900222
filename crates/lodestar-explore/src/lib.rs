//! Search side of the engine: everything a worker needs to generate call
//! sequences, share interesting ones, and minimize the failures it finds.
//!
//! Per-worker state (RNG, weights, in-progress sequence) is owned by the
//! worker. The [`corpus::Corpus`] is the only structure workers share.

pub mod cancel;
pub mod corpus;
pub mod error;
pub mod generator;
pub mod rng;
pub mod shrink;
pub mod value;
pub mod weights;
pub mod worker;
