//! The decompilation pipeline.
//!
//! raw bytes -> `BinaryImage` -> engine (CFG + calling conventions) ->
//! `select_functions` -> per-function `decompile_isolated` -> `Emitter`.
//!
//! Only pre-analysis failures (unreadable input, unloadable image, corrupt
//! whole-binary analysis) and output-stream failures abort a run. Every
//! per-function condition ends up as a block of output text.

pub mod emit;
pub mod selector;

use std::any::Any;
use std::io::{self, Read, Write};
use std::panic::{self, AssertUnwindSafe};

use thiserror::Error;

use crate::config::{ConfigError, RunConfig};
use crate::loader::{BinaryImage, LoadError};
use crate::model::{DecompilationResult, FunctionDescriptor};
use crate::services::analysis::{AnalysisEngine, EngineError, EngineKind};

pub use emit::Emitter;
pub use selector::{select_functions, Selection};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Failed to write output: {0}")]
    Output(#[from] io::Error),
}

/// Counts of emitted blocks for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub discovered: usize,
    pub selected: usize,
    pub code: usize,
    pub empty: usize,
    pub failed: usize,
    /// Set when a name filter matched no function.
    pub missing: Option<String>,
}

/// Decompile one function behind a fault boundary.
///
/// Engine errors and panics are both turned into `DecompilationResult::Failed`;
/// whitespace-only output counts as no output.
pub fn decompile_isolated<E: AnalysisEngine>(
    engine: &E,
    model: &E::Model,
    function: &FunctionDescriptor,
) -> DecompilationResult {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| engine.decompile_one(model, function)));
    match outcome {
        Ok(Ok(Some(text))) if !text.trim().is_empty() => DecompilationResult::Code(text),
        Ok(Ok(_)) => DecompilationResult::Empty,
        Ok(Err(err)) => DecompilationResult::Failed(err.to_string()),
        Err(payload) => DecompilationResult::Failed(panic_message(payload.as_ref())),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "engine panicked".to_string()
    }
}

/// Run the whole pipeline over `input`, streaming blocks to `output`.
pub fn run<E, R, W>(
    engine: &E,
    config: &RunConfig,
    input: R,
    output: W,
) -> Result<RunSummary, PipelineError>
where
    E: AnalysisEngine,
    R: Read,
    W: Write,
{
    let identity = engine.identity();
    let _run = tracing::info_span!("run", engine = %identity.name).entered();

    // Held until the end of the run so the staged file outlives every engine call.
    let image = BinaryImage::from_reader(input)?;
    tracing::info!(bytes = image.len(), sha256 = image.sha256(), "loaded input image");

    let project = engine.open(&image)?;
    let mut model = engine.recover_control_flow(project)?;
    engine.recover_calling_conventions(&mut model)?;

    let functions = engine.list_functions(&model);
    let mut summary = RunSummary { discovered: functions.len(), ..RunSummary::default() };
    tracing::debug!(discovered = functions.len(), "control-flow recovery finished");

    let mut emitter = Emitter::new(output, config.format);
    let selected = match select_functions(functions, config) {
        Selection::Missing(name) => {
            tracing::info!(function = %name, "name filter matched no function");
            emitter.missing(&name)?;
            summary.missing = Some(name);
            return Ok(summary);
        }
        Selection::Functions(selected) => selected,
    };
    summary.selected = selected.len();

    for function in &selected {
        let _span = tracing::debug_span!("decompile", function = %function.name).entered();
        let result = decompile_isolated(engine, &model, function);
        match &result {
            DecompilationResult::Code(_) => summary.code += 1,
            DecompilationResult::Empty => summary.empty += 1,
            DecompilationResult::Failed(cause) => {
                summary.failed += 1;
                tracing::warn!(function = %function.name, %cause, "decompilation failed");
            }
        }
        emitter.emit(function, &result)?;
    }

    tracing::info!(
        selected = summary.selected,
        code = summary.code,
        empty = summary.empty,
        failed = summary.failed,
        "run finished"
    );
    Ok(summary)
}

/// Run the pipeline with the engine named by `kind`.
pub fn run_with_engine<R: Read, W: Write>(
    kind: EngineKind,
    config: &RunConfig,
    input: R,
    output: W,
) -> Result<RunSummary, PipelineError> {
    match kind {
        #[cfg(feature = "capstone-engine")]
        EngineKind::Capstone => {
            run(&crate::services::backends::CapstoneEngine::new(), config, input, output)
        }
        #[cfg(not(feature = "capstone-engine"))]
        EngineKind::Capstone => Err(ConfigError::EngineUnavailable(kind.to_string()).into()),
        EngineKind::Manifest => {
            run(&crate::services::backends::ManifestEngine, config, input, output)
        }
    }
}
