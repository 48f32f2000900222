//! Plain data model shared by every Lodestar crate.
//!
//! Nothing in here executes a system under test. Operation descriptors,
//! argument values, call sequences, invariant declarations and campaign
//! configuration are all immutable-once-built values that cross crate and
//! thread boundaries freely.

pub mod parse;
pub mod sequence;
pub mod types;
