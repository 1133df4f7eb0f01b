use decomp_core::config::{FunctionOrder, OutputFormat, RunConfig};
use decomp_core::loader::BinaryImage;
use decomp_core::model::FunctionDescriptor;
use decomp_core::pipeline::{run_with_engine, PipelineError};
use decomp_core::services::analysis::{AnalysisEngine, EngineError, EngineKind};
use decomp_core::services::backends::ManifestEngine;

const MANIFEST: &str = r#"{
  "version": "fixture-1",
  "functions": [
    {"name": "main", "address": 4352, "outcome": {"code": "int main(void) {\n    return helper();\n}"}},
    {"name": "puts", "address": 4144, "is_plt": true, "outcome": {"code": "never shown"}},
    {"name": "helper", "address": 4320, "outcome": {"code": "int helper(void) { return 1; }\n"}},
    {"name": "stub", "address": 4400},
    {"name": "broken", "address": 4096, "outcome": {"error": "irreducible loop"}}
  ]
}"#;

fn run_manifest(config: &RunConfig) -> String {
    let mut out = Vec::new();
    run_with_engine(EngineKind::Manifest, config, MANIFEST.as_bytes(), &mut out).unwrap();
    String::from_utf8(out).unwrap()
}

#[test]
fn manifest_drives_full_pipeline() {
    let out = run_manifest(&RunConfig::default());
    assert_eq!(
        out,
        "int main(void) {\n    return helper();\n}\n\n\
         int helper(void) { return 1; }\n\n\
         // No decompilation output for function stub\n\n\
         Exception thrown decompiling function broken: irreducible loop\n"
    );
}

#[test]
fn manifest_address_order() {
    let config = RunConfig::new(None, 2).with_order(FunctionOrder::Address);
    let out = run_manifest(&config);
    assert_eq!(
        out,
        "Exception thrown decompiling function broken: irreducible loop\n\
         int helper(void) { return 1; }\n\n"
    );
}

#[test]
fn manifest_json_lines() {
    let config = RunConfig::new(Some("helper".into()), 0).with_format(OutputFormat::JsonLines);
    let out = run_manifest(&config);
    let record: serde_json::Value = serde_json::from_str(out.trim_end()).unwrap();
    assert_eq!(record["function"], "helper");
    assert_eq!(record["address"], 4320);
    assert_eq!(record["status"], "ok");
}

#[test]
fn model_tracks_calling_convention_pass() {
    let engine = ManifestEngine;
    let image = BinaryImage::from_bytes(MANIFEST.as_bytes()).unwrap();
    let project = engine.open(&image).unwrap();
    let mut model = engine.recover_control_flow(project).unwrap();
    assert!(!model.conventions_recovered());
    engine.recover_calling_conventions(&mut model).unwrap();
    assert!(model.conventions_recovered());
    assert_eq!(model.manifest_version(), Some("fixture-1"));
    assert!(matches!(
        engine.recover_calling_conventions(&mut model),
        Err(EngineError::Analysis(_))
    ));
    assert_eq!(engine.list_functions(&model).len(), 5);
}

#[test]
fn unknown_function_is_an_engine_error() {
    let engine = ManifestEngine;
    let image = BinaryImage::from_bytes(MANIFEST.as_bytes()).unwrap();
    let model = engine.recover_control_flow(engine.open(&image).unwrap()).unwrap();
    let err = engine.decompile_one(&model, &FunctionDescriptor::new("ghost", 1)).unwrap_err();
    assert!(matches!(err, EngineError::UnknownFunction(name) if name == "ghost"));
}

#[test]
fn non_manifest_input_fails_to_load() {
    let mut out = Vec::new();
    let err = run_with_engine(
        EngineKind::Manifest,
        &RunConfig::default(),
        &b"\x7fELF\x02\x01\x01"[..],
        &mut out,
    )
    .unwrap_err();
    assert!(matches!(err, PipelineError::Engine(EngineError::Load(_))));
    assert!(out.is_empty());
}

#[test]
fn manifest_identity_is_static() {
    let identity = EngineKind::Manifest.identity().unwrap();
    assert_eq!(identity.name, "manifest");
    assert_eq!(identity.version, decomp_core::version());
}

#[test]
fn same_named_functions_keep_their_own_outcomes() {
    let manifest = r#"{"functions": [
        {"name": "f", "outcome": {"code": "A"}},
        {"name": "f", "outcome": {"error": "boom"}},
        {"name": "f", "outcome": "empty"}
    ]}"#;
    let mut out = Vec::new();
    let summary =
        run_with_engine(EngineKind::Manifest, &RunConfig::default(), manifest.as_bytes(), &mut out)
            .unwrap();
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "A\n\n\
         Exception thrown decompiling function f: boom\n\
         // No decompilation output for function f\n\n"
    );
    assert_eq!(summary.failed, 1);
}
