//! decomp-core
//!
//! Core library for fault-isolated batch decompilation of native binaries.
//!
//! A run stages the input bytes in a temporary file (`loader`), builds one
//! whole-binary control-flow model through an `AnalysisEngine`
//! (`services`), narrows the discovered functions (`pipeline::selector`) and
//! decompiles them one at a time, streaming each result to the output as soon
//! as it exists (`pipeline::emit`). A failure inside one function never ends
//! the run.
//!
//! All substantive logic lives here so frontends stay thin.

pub mod config;
pub mod loader;
pub mod model;
pub mod pipeline;
pub mod services;

/// Returns the library version as encoded at compile time.
///
/// Frontends report this through `--version`.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
