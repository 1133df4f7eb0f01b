//! Native engine: goblin for container parsing, capstone for decoding.
//!
//! `open` maps the image, `recover_control_flow` runs recursive descent over
//! every seed address, `recover_calling_conventions` infers prototypes, and
//! `decompile_one` renders pseudo-C from the shared model.

mod convention;
mod image;
mod pseudo;
mod recovery;

use std::collections::BTreeMap;

use capstone::{arch, prelude::*, Capstone};

use crate::loader::BinaryImage;
use crate::model::{FunctionDescriptor, ToolIdentity};
use crate::services::analysis::{AnalysisEngine, EngineError};

use image::{Arch, ImageLayout};
use recovery::{Decoders, RecoveredFunction};

#[derive(Debug, Default)]
pub struct CapstoneEngine;

impl CapstoneEngine {
    pub fn new() -> Self {
        Self
    }
}

/// A parsed image awaiting control-flow recovery.
pub struct NativeProject {
    layout: ImageLayout,
}

/// Whole-binary model: every recovered function keyed by entry address.
pub struct NativeModel {
    layout: ImageLayout,
    functions: BTreeMap<u64, RecoveredFunction>,
    conventions_recovered: bool,
}

impl NativeModel {
    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    pub fn conventions_recovered(&self) -> bool {
        self.conventions_recovered
    }

    /// Recovered parameter names of the function at `address`.
    pub fn parameters(&self, address: u64) -> Option<&[String]> {
        self.functions.get(&address).map(|f| f.signature.params.as_slice())
    }

    /// Whether the function at `address` was found to return a value.
    pub fn returns_value(&self, address: u64) -> Option<bool> {
        self.functions.get(&address).map(|f| f.signature.returns)
    }

    fn find(&self, function: &FunctionDescriptor) -> Option<&RecoveredFunction> {
        self.functions
            .get(&function.address)
            .filter(|f| f.descriptor.name == function.name)
            .or_else(|| self.functions.values().find(|f| f.descriptor.name == function.name))
    }
}

fn make_cs(arch: Arch) -> Result<Capstone, EngineError> {
    let built = match arch {
        Arch::X86_64 => {
            Capstone::new().x86().mode(arch::x86::ArchMode::Mode64).detail(true).build()
        }
        Arch::X86 => Capstone::new().x86().mode(arch::x86::ArchMode::Mode32).detail(true).build(),
        Arch::Arm => Capstone::new().arm().mode(arch::arm::ArchMode::Arm).detail(true).build(),
        Arch::Arm64 => {
            Capstone::new().arm64().mode(arch::arm64::ArchMode::Arm).detail(true).build()
        }
    };
    built.map_err(|e| EngineError::Analysis(format!("capstone init failed: {e}")))
}

fn make_decoders(arch: Arch) -> Result<Decoders, EngineError> {
    let thumb = match arch {
        Arch::Arm => Some(
            Capstone::new()
                .arm()
                .mode(arch::arm::ArchMode::Thumb)
                .detail(true)
                .build()
                .map_err(|e| EngineError::Analysis(format!("capstone init failed: {e}")))?,
        ),
        _ => None,
    };
    Ok(Decoders { arch, primary: make_cs(arch)?, thumb })
}

impl AnalysisEngine for CapstoneEngine {
    type Project = NativeProject;
    type Model = NativeModel;

    fn identity(&self) -> ToolIdentity {
        let (major, minor) = Capstone::lib_version();
        ToolIdentity {
            name: "capstone".to_string(),
            version: format!("{major}.{minor}"),
            homepage: "https://www.capstone-engine.org/".to_string(),
        }
    }

    fn open(&self, image: &BinaryImage) -> Result<NativeProject, EngineError> {
        let bytes = image
            .read_bytes()
            .map_err(|e| EngineError::Load(format!("cannot read staged image: {e}")))?;
        let layout = ImageLayout::parse(bytes)?;
        tracing::debug!(
            arch = pseudo::arch_name(layout.arch),
            sections = layout.sections.len(),
            symbols = layout.symbols.len(),
            imports = layout.imports.len(),
            "image parsed"
        );
        Ok(NativeProject { layout })
    }

    fn recover_control_flow(&self, project: NativeProject) -> Result<NativeModel, EngineError> {
        let layout = project.layout;
        let decoders = make_decoders(layout.arch)?;
        let functions = recovery::recover_functions(&layout, &decoders);
        let undecodable = functions.values().filter(|f| f.decode_error.is_some()).count();
        if undecodable > 0 {
            tracing::debug!(undecodable, "functions without a decodable entry");
        }
        Ok(NativeModel { layout, functions, conventions_recovered: false })
    }

    fn recover_calling_conventions(&self, model: &mut NativeModel) -> Result<(), EngineError> {
        if model.conventions_recovered {
            return Err(EngineError::Analysis(
                "calling conventions were already recovered for this model".into(),
            ));
        }
        convention::recover_signatures(&model.layout, &mut model.functions);
        model.conventions_recovered = true;
        Ok(())
    }

    fn list_functions(&self, model: &NativeModel) -> Vec<FunctionDescriptor> {
        model.functions.values().map(|f| f.descriptor.clone()).collect()
    }

    fn decompile_one(
        &self,
        model: &NativeModel,
        function: &FunctionDescriptor,
    ) -> Result<Option<String>, EngineError> {
        let recovered = model
            .find(function)
            .ok_or_else(|| EngineError::UnknownFunction(function.name.clone()))?;
        if let Some(reason) = &recovered.decode_error {
            return Err(EngineError::Decompile(reason.clone()));
        }
        if recovered.descriptor.is_simprocedure {
            return Ok(None);
        }
        Ok(pseudo::render(&model.layout, &model.functions, recovered))
    }
}
