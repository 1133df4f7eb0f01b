use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::config::ConfigError;
use crate::loader::BinaryImage;
use crate::model::{FunctionDescriptor, ToolIdentity};

#[derive(Debug, Error)]
pub enum EngineError {
    /// The image is not an executable format the engine recognizes.
    #[error("Failed to load binary: {0}")]
    Load(String),
    /// Unrecoverable structural corruption during whole-binary analysis.
    #[error("Analysis failed: {0}")]
    Analysis(String),
    /// Decompiling a single function failed.
    #[error("{0}")]
    Decompile(String),
    #[error("Function '{0}' is not part of the control-flow model")]
    UnknownFunction(String),
}

/// Narrow interface over a binary-analysis engine.
///
/// The pipeline drives an engine through exactly this sequence: `open`,
/// `recover_control_flow`, `recover_calling_conventions` (once), then
/// `list_functions` and one `decompile_one` per selected function. The model is
/// built once and only borrowed immutably after calling-convention recovery.
pub trait AnalysisEngine {
    /// Loaded but not yet analyzed binary.
    type Project;
    /// Whole-binary control-flow model shared by every later call.
    type Model;

    /// Identity reported by the metadata flags. Must not touch any binary.
    fn identity(&self) -> ToolIdentity;

    /// Load the staged image without auxiliary libraries or external debug files.
    fn open(&self, image: &BinaryImage) -> Result<Self::Project, EngineError>;

    /// Whole-binary CFG recovery. Partial graphs are an accepted outcome.
    fn recover_control_flow(&self, project: Self::Project) -> Result<Self::Model, EngineError>;

    /// Parameter/return recovery with call-site sensitivity.
    fn recover_calling_conventions(&self, model: &mut Self::Model) -> Result<(), EngineError>;

    /// Every discovered function, in the engine's enumeration order.
    fn list_functions(&self, model: &Self::Model) -> Vec<FunctionDescriptor>;

    /// Decompile one function. `Ok(None)` means the engine produced no output.
    fn decompile_one(
        &self,
        model: &Self::Model,
        function: &FunctionDescriptor,
    ) -> Result<Option<String>, EngineError>;
}

/// Engines known to this build; callers select by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineKind {
    /// Native capstone/goblin engine.
    #[default]
    Capstone,
    /// Replays a JSON analysis manifest supplied as the input image.
    Manifest,
}

impl EngineKind {
    pub const ALL: [EngineKind; 2] = [EngineKind::Capstone, EngineKind::Manifest];

    pub fn as_str(self) -> &'static str {
        match self {
            EngineKind::Capstone => "capstone",
            EngineKind::Manifest => "manifest",
        }
    }

    /// Return a sorted list of engine names for error messages/help.
    pub fn names() -> Vec<&'static str> {
        let mut names: Vec<&'static str> = Self::ALL.iter().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn is_available(self) -> bool {
        match self {
            EngineKind::Capstone => cfg!(feature = "capstone-engine"),
            EngineKind::Manifest => true,
        }
    }

    /// Identity of the engine, answered without constructing any analysis state.
    pub fn identity(self) -> Result<ToolIdentity, ConfigError> {
        match self {
            #[cfg(feature = "capstone-engine")]
            EngineKind::Capstone => Ok(crate::services::backends::CapstoneEngine::new().identity()),
            #[cfg(not(feature = "capstone-engine"))]
            EngineKind::Capstone => Err(ConfigError::EngineUnavailable(self.to_string())),
            EngineKind::Manifest => Ok(crate::services::backends::ManifestEngine.identity()),
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| ConfigError::UnknownEngine(wanted, Self::names().join(", ")))
    }
}
