//! Campaign control for the Lodestar fuzzing engine: the parallel
//! controller, resource limits, analytics, a registry of WASM-backed
//! campaigns and the JSON-RPC tool surface served by the `lodestar` binary.

pub mod analytics;
pub mod campaign;
pub mod limits;
pub mod manager;
pub mod mcp;
