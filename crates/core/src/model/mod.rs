//! Core data model shared by engines, the selector, and the emitter.
//!
//! - `FunctionDescriptor`: one discovered function plus its classification flags.
//! - `DecompilationResult`: the per-function outcome handed to the emitter.
//! - `ToolIdentity`: what `--name` / `--version` / `--url` report.

use serde::{Deserialize, Serialize};

/// A function discovered by an engine's control-flow pass.
///
/// `name` is the matching key for scope restriction; it is not guaranteed to be
/// unique across a binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDescriptor {
    pub name: String,
    #[serde(default)]
    pub address: u64,
    /// Import trampoline (PLT-style stub).
    #[serde(default)]
    pub is_plt: bool,
    /// Procedure the engine models instead of analyzing (e.g. unresolved imports).
    #[serde(default)]
    pub is_simprocedure: bool,
    /// Padding between functions, not real code.
    #[serde(default)]
    pub is_alignment: bool,
}

impl FunctionDescriptor {
    pub fn new(name: impl Into<String>, address: u64) -> Self {
        Self {
            name: name.into(),
            address,
            is_plt: false,
            is_simprocedure: false,
            is_alignment: false,
        }
    }

    /// Only functions with none of the classification flags set are decompiled.
    pub fn is_candidate(&self) -> bool {
        !self.is_plt && !self.is_simprocedure && !self.is_alignment
    }
}

/// Outcome of decompiling one function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecompilationResult {
    /// Non-empty pseudocode.
    Code(String),
    /// The engine ran but produced nothing.
    Empty,
    /// The engine failed; carries a human-readable cause.
    Failed(String),
}

impl DecompilationResult {
    pub fn kind(&self) -> ResultKind {
        match self {
            DecompilationResult::Code(_) => ResultKind::Code,
            DecompilationResult::Empty => ResultKind::Empty,
            DecompilationResult::Failed(_) => ResultKind::Failed,
        }
    }
}

/// Block type of a result, without its payload. Useful for comparing runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultKind {
    Code,
    Empty,
    Failed,
}

/// Identity answered by the metadata flags without touching any binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolIdentity {
    pub name: String,
    pub version: String,
    pub homepage: String,
}
