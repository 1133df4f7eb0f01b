use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Environment variable holding the exact-name function filter.
pub const FUNCTION_NAME_ENV: &str = "DECOMP_FUNCTION_NAME";
/// Environment variable holding the maximum number of functions to process.
pub const MAX_FUNCTIONS_ENV: &str = "DECOMP_MAX_FUNCTIONS";
/// Environment variable selecting the analysis engine.
pub const ENGINE_ENV: &str = "DECOMP_ENGINE";
/// Environment variable selecting the output framing.
pub const FORMAT_ENV: &str = "DECOMP_FORMAT";
/// Environment variable selecting the function order.
pub const ORDER_ENV: &str = "DECOMP_ORDER";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid maximum function count '{0}': expected a non-negative integer")]
    InvalidMaxFunctions(String),
    #[error("Unknown output format '{0}'. Allowed: text, jsonl")]
    UnknownFormat(String),
    #[error("Unknown function order '{0}'. Allowed: engine, address")]
    UnknownOrder(String),
    #[error("Unknown engine '{0}'. Allowed: {1}")]
    UnknownEngine(String, String),
    #[error("Engine '{0}' is not available in this build")]
    EngineUnavailable(String),
}

/// Output framing for emitted blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Plain text blocks with diagnostic line prefixes.
    #[default]
    Text,
    /// One JSON object per function, one per line.
    JsonLines,
}

impl FromStr for OutputFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "jsonl" | "json-lines" => Ok(OutputFormat::JsonLines),
            other => Err(ConfigError::UnknownFormat(other.to_string())),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => f.write_str("text"),
            OutputFormat::JsonLines => f.write_str("jsonl"),
        }
    }
}

/// Order in which selected functions are processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FunctionOrder {
    /// The engine's native enumeration order.
    #[default]
    Engine,
    /// Ascending entry address (stable for equal addresses).
    Address,
}

impl FromStr for FunctionOrder {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "engine" => Ok(FunctionOrder::Engine),
            "address" => Ok(FunctionOrder::Address),
            other => Err(ConfigError::UnknownOrder(other.to_string())),
        }
    }
}

impl fmt::Display for FunctionOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionOrder::Engine => f.write_str("engine"),
            FunctionOrder::Address => f.write_str("address"),
        }
    }
}

/// Parse a maximum function count. `0` means unlimited.
///
/// Usable directly as a clap `value_parser`.
pub fn parse_max_functions(raw: &str) -> Result<usize, ConfigError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(0);
    }
    trimmed.parse::<usize>().map_err(|_| ConfigError::InvalidMaxFunctions(raw.to_string()))
}

/// Scope restriction and framing for one run. Built once, read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunConfig {
    function_name: Option<String>,
    max_functions: usize,
    pub format: OutputFormat,
    pub order: FunctionOrder,
}

impl RunConfig {
    /// Create a configuration. An empty name is treated as no filter.
    pub fn new(function_name: Option<String>, max_functions: usize) -> Self {
        Self {
            function_name: function_name.filter(|name| !name.is_empty()),
            max_functions,
            format: OutputFormat::default(),
            order: FunctionOrder::default(),
        }
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_order(mut self, order: FunctionOrder) -> Self {
        self.order = order;
        self
    }

    pub fn function_name(&self) -> Option<&str> {
        self.function_name.as_deref()
    }

    /// `None` when unlimited.
    pub fn max_functions(&self) -> Option<usize> {
        (self.max_functions > 0).then_some(self.max_functions)
    }
}
