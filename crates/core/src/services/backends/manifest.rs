use std::cell::Cell;

use serde::Deserialize;

use crate::loader::BinaryImage;
use crate::model::{FunctionDescriptor, ToolIdentity};
use crate::services::analysis::{AnalysisEngine, EngineError};

/// Replays a JSON analysis manifest instead of analyzing machine code.
///
/// The input image is a document such as:
///
/// ```json
/// {"functions": [
///   {"name": "main", "address": 4096, "outcome": {"code": "int main() { return 0; }"}},
///   {"name": "puts", "is_plt": true, "outcome": "empty"},
///   {"name": "broken", "outcome": {"error": "irreducible control flow"}}
/// ]}
/// ```
///
/// Lets the pipeline be driven end-to-end with scripted per-function outcomes,
/// including engine panics.
pub struct ManifestEngine;

#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub version: Option<String>,
    pub functions: Vec<ManifestFunction>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestFunction {
    #[serde(flatten)]
    pub descriptor: FunctionDescriptor,
    #[serde(default)]
    pub outcome: ManifestOutcome,
}

/// Scripted result of decompiling one manifest function.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManifestOutcome {
    Code(String),
    #[default]
    Empty,
    Error(String),
    Panic(String),
}

/// Control-flow model of a manifest: the parsed document plus pass bookkeeping.
///
/// Entries with identical descriptors replay in document order: each
/// decompilation consumes the first matching entry not yet replayed.
#[derive(Debug)]
pub struct ManifestModel {
    manifest: Manifest,
    replayed: Vec<Cell<bool>>,
    conventions_recovered: bool,
}

impl ManifestModel {
    pub fn conventions_recovered(&self) -> bool {
        self.conventions_recovered
    }

    pub fn manifest_version(&self) -> Option<&str> {
        self.manifest.version.as_deref()
    }

    fn entry_for(&self, function: &FunctionDescriptor) -> Option<&ManifestFunction> {
        let mut matching = self
            .manifest
            .functions
            .iter()
            .zip(&self.replayed)
            .filter(|(f, _)| f.descriptor == *function)
            .peekable();
        let first = matching.peek().map(|(f, _)| *f)?;
        match matching.find(|(_, done)| !done.get()) {
            Some((entry, done)) => {
                done.set(true);
                Some(entry)
            }
            None => Some(first),
        }
    }
}

impl AnalysisEngine for ManifestEngine {
    type Project = Manifest;
    type Model = ManifestModel;

    fn identity(&self) -> ToolIdentity {
        ToolIdentity {
            name: "manifest".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            homepage: "https://www.json.org/".to_string(),
        }
    }

    fn open(&self, image: &BinaryImage) -> Result<Manifest, EngineError> {
        let bytes = image
            .read_bytes()
            .map_err(|e| EngineError::Load(format!("failed to read staged image: {e}")))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| EngineError::Load(format!("not an analysis manifest: {e}")))
    }

    fn recover_control_flow(&self, project: Manifest) -> Result<ManifestModel, EngineError> {
        let replayed = project.functions.iter().map(|_| Cell::new(false)).collect();
        Ok(ManifestModel { manifest: project, replayed, conventions_recovered: false })
    }

    fn recover_calling_conventions(&self, model: &mut ManifestModel) -> Result<(), EngineError> {
        if model.conventions_recovered {
            return Err(EngineError::Analysis(
                "calling conventions were already recovered for this model".into(),
            ));
        }
        model.conventions_recovered = true;
        Ok(())
    }

    fn list_functions(&self, model: &ManifestModel) -> Vec<FunctionDescriptor> {
        model.manifest.functions.iter().map(|f| f.descriptor.clone()).collect()
    }

    fn decompile_one(
        &self,
        model: &ManifestModel,
        function: &FunctionDescriptor,
    ) -> Result<Option<String>, EngineError> {
        let entry = model
            .entry_for(function)
            .ok_or_else(|| EngineError::UnknownFunction(function.name.clone()))?;
        match &entry.outcome {
            ManifestOutcome::Code(text) => Ok(Some(text.clone())),
            ManifestOutcome::Empty => Ok(None),
            ManifestOutcome::Error(message) => Err(EngineError::Decompile(message.clone())),
            ManifestOutcome::Panic(message) => panic!("{message}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_accepts_unit_and_tagged_forms() {
        let body = r#"{"functions":[
            {"name":"a","outcome":{"code":"int a;"}},
            {"name":"b","outcome":"empty"},
            {"name":"c","outcome":{"error":"boom"}},
            {"name":"d"}
        ]}"#;
        let manifest: Manifest = serde_json::from_str(body).unwrap();
        assert!(matches!(manifest.functions[0].outcome, ManifestOutcome::Code(_)));
        assert!(matches!(manifest.functions[1].outcome, ManifestOutcome::Empty));
        assert!(matches!(manifest.functions[2].outcome, ManifestOutcome::Error(_)));
        assert!(matches!(manifest.functions[3].outcome, ManifestOutcome::Empty));
        assert!(manifest.functions[3].descriptor.is_candidate());
    }
}
