use std::io::{self, Read, Write};

use anyhow::{Context, Result};

use decomp_core::config::{parse_max_functions, FunctionOrder, OutputFormat, RunConfig};
use decomp_core::pipeline::{self, RunSummary};
use decomp_core::services::analysis::EngineKind;

/// Raw run options as collected from flags and their environment fallbacks.
#[derive(Debug, Clone, Default)]
pub struct DecompileArgs {
    pub function: Option<String>,
    pub max_functions: Option<String>,
    pub engine: Option<String>,
    pub format: Option<String>,
    pub order: Option<String>,
}

/// Validate the raw options into an engine choice and an immutable `RunConfig`.
///
/// Runs before any input is read, so a bad value never produces output.
pub fn build_run_config(args: &DecompileArgs) -> Result<(EngineKind, RunConfig)> {
    let engine: EngineKind = match args.engine.as_deref() {
        Some(name) => name.parse()?,
        None => EngineKind::default(),
    };
    if !engine.is_available() {
        anyhow::bail!("Engine '{engine}' is not available in this build");
    }
    let max_functions = match args.max_functions.as_deref() {
        Some(raw) => parse_max_functions(raw)?,
        None => 0,
    };
    let format: OutputFormat = match args.format.as_deref() {
        Some(raw) => raw.parse()?,
        None => OutputFormat::default(),
    };
    let order: FunctionOrder = match args.order.as_deref() {
        Some(raw) => raw.parse()?,
        None => FunctionOrder::default(),
    };
    let config = RunConfig::new(args.function.clone(), max_functions)
        .with_format(format)
        .with_order(order);
    Ok((engine, config))
}

/// Run the pipeline over arbitrary streams.
pub fn decompile_stream<R: Read, W: Write>(
    args: &DecompileArgs,
    input: R,
    output: W,
) -> Result<RunSummary> {
    let (engine, config) = build_run_config(args).context("Invalid run configuration")?;
    tracing::debug!(
        %engine,
        format = %config.format,
        order = %config.order,
        function = config.function_name().unwrap_or(""),
        max_functions = config.max_functions().unwrap_or(0),
        "configuration resolved"
    );
    let summary = pipeline::run_with_engine(engine, &config, input, output)
        .with_context(|| format!("Decompilation run with engine '{engine}' failed"))?;
    Ok(summary)
}

/// Decompile the binary on stdin, streaming blocks to stdout.
pub fn decompile_command(args: &DecompileArgs) -> Result<()> {
    let stdin = io::stdin().lock();
    let stdout = io::stdout().lock();
    let summary = decompile_stream(args, stdin, stdout)?;
    if let Some(name) = &summary.missing {
        tracing::info!(function = %name, "no function matched the name filter");
    }
    Ok(())
}
