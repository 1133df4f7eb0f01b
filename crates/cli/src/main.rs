use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use batch_decomp::commands::{decompile_command, identity_command, DecompileArgs, IdentityQuery};
use decomp_core::config::{ENGINE_ENV, FORMAT_ENV, FUNCTION_NAME_ENV, MAX_FUNCTIONS_ENV, ORDER_ENV};

/// Decompile every function of a native binary read from stdin.
///
/// Each function becomes one block on stdout, in order. A function that fails
/// to decompile yields a one-line diagnostic and the run continues.
#[derive(Parser, Debug)]
#[command(
    name = "batch-decomp",
    about = "Fault-isolated batch decompilation of a binary read from stdin",
    long_about = None,
    disable_version_flag = true
)]
struct Cli {
    /// Print the engine version followed by an empty line, then exit.
    #[arg(long, default_value_t = false)]
    version: bool,

    /// Print the engine name, then exit.
    #[arg(long, default_value_t = false)]
    name: bool,

    /// Print the engine homepage, then exit.
    #[arg(long, default_value_t = false)]
    url: bool,

    /// Decompile only functions with exactly this name.
    #[arg(long, env = FUNCTION_NAME_ENV)]
    function: Option<String>,

    /// Decompile at most this many functions (0 = unlimited).
    #[arg(long, env = MAX_FUNCTIONS_ENV)]
    max_functions: Option<String>,

    /// Analysis engine: capstone or manifest.
    #[arg(long, env = ENGINE_ENV)]
    engine: Option<String>,

    /// Output framing: text or jsonl.
    #[arg(long, env = FORMAT_ENV)]
    format: Option<String>,

    /// Function order: engine or address.
    #[arg(long, env = ORDER_ENV)]
    order: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Stdout carries decompiler output only; diagnostics go to stderr.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let query = if cli.version {
        Some(IdentityQuery::Version)
    } else if cli.name {
        Some(IdentityQuery::Name)
    } else if cli.url {
        Some(IdentityQuery::Url)
    } else {
        None
    };
    if let Some(query) = query {
        return identity_command(cli.engine.as_deref(), query);
    }

    decompile_command(&DecompileArgs {
        function: cli.function,
        max_functions: cli.max_functions,
        engine: cli.engine,
        format: cli.format,
        order: cli.order,
    })
}
