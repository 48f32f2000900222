//! WASM modules as systems under test.
//!
//! A module is loaded into an isolated wasmtime store with no imports,
//! metered by fuel and capped in memory. [`wasm_sut::WasmSut`] exposes its
//! exports through the engine's adapter contract.

pub mod config;
pub mod harvest;
pub mod sandbox;
pub mod snapshot;
pub mod wasm_sut;
