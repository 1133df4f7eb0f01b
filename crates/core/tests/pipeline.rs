use std::cell::{Cell, RefCell};

use decomp_core::config::{OutputFormat, RunConfig};
use decomp_core::loader::BinaryImage;
use decomp_core::model::{DecompilationResult, FunctionDescriptor, ToolIdentity};
use decomp_core::pipeline::{decompile_isolated, run, PipelineError, RunSummary};
use decomp_core::services::analysis::{AnalysisEngine, EngineError};

#[derive(Clone, Copy)]
enum Script {
    Code,
    Empty,
    Blank,
    Error,
    Panic,
}

/// In-memory engine that records how the pipeline drives it.
#[derive(Default)]
struct ScriptedEngine {
    functions: Vec<(FunctionDescriptor, Option<Script>)>,
    fail_analysis: bool,
    convention_passes: Cell<usize>,
    decompiled: RefCell<Vec<String>>,
}

impl ScriptedEngine {
    fn with(functions: &[(&str, Script)]) -> Self {
        Self {
            functions: functions
                .iter()
                .enumerate()
                .map(|(idx, (name, script))| {
                    (FunctionDescriptor::new(*name, 0x1000 + idx as u64), Some(*script))
                })
                .collect(),
            ..Self::default()
        }
    }

    fn push_plt(&mut self, name: &str) {
        let mut descriptor = FunctionDescriptor::new(name, 0x10);
        descriptor.is_plt = true;
        self.functions.push((descriptor, None));
    }
}

impl AnalysisEngine for ScriptedEngine {
    type Project = ();
    type Model = ();

    fn identity(&self) -> ToolIdentity {
        ToolIdentity {
            name: "scripted".into(),
            version: "1.0".into(),
            homepage: "https://example.invalid/".into(),
        }
    }

    fn open(&self, _image: &BinaryImage) -> Result<(), EngineError> {
        Ok(())
    }

    fn recover_control_flow(&self, _project: ()) -> Result<(), EngineError> {
        if self.fail_analysis {
            return Err(EngineError::Analysis("corrupt section table".into()));
        }
        Ok(())
    }

    fn recover_calling_conventions(&self, _model: &mut ()) -> Result<(), EngineError> {
        self.convention_passes.set(self.convention_passes.get() + 1);
        Ok(())
    }

    fn list_functions(&self, _model: &()) -> Vec<FunctionDescriptor> {
        self.functions.iter().map(|(f, _)| f.clone()).collect()
    }

    fn decompile_one(
        &self,
        _model: &(),
        function: &FunctionDescriptor,
    ) -> Result<Option<String>, EngineError> {
        self.decompiled.borrow_mut().push(function.name.clone());
        let script = self
            .functions
            .iter()
            .find(|(f, _)| f == function)
            .and_then(|(_, script)| *script)
            .expect("only candidates are decompiled");
        match script {
            Script::Code => Ok(Some(format!("void {}(void) {{}}", function.name))),
            Script::Empty => Ok(None),
            Script::Blank => Ok(Some("   \n".into())),
            Script::Error => Err(EngineError::Decompile("unsupported opcode".into())),
            Script::Panic => panic!("engine bug in {}", function.name),
        }
    }
}

fn run_text(engine: &ScriptedEngine, config: &RunConfig) -> (String, RunSummary) {
    let mut out = Vec::new();
    let summary = run(engine, config, &b"binary"[..], &mut out).unwrap();
    (String::from_utf8(out).unwrap(), summary)
}

#[test]
fn every_selected_function_yields_one_block_in_order() {
    let mut engine = ScriptedEngine::with(&[
        ("main", Script::Code),
        ("quiet", Script::Empty),
        ("broken", Script::Error),
        ("crashy", Script::Panic),
        ("last", Script::Code),
    ]);
    engine.push_plt("puts");

    let (out, summary) = run_text(&engine, &RunConfig::default());
    assert_eq!(
        out,
        "void main(void) {}\n\n\
         // No decompilation output for function quiet\n\n\
         Exception thrown decompiling function broken: unsupported opcode\n\
         Exception thrown decompiling function crashy: engine bug in crashy\n\
         void last(void) {}\n\n"
    );
    assert_eq!(summary.discovered, 6);
    assert_eq!(summary.selected, 5);
    assert_eq!((summary.code, summary.empty, summary.failed), (2, 1, 2));
    assert_eq!(*engine.decompiled.borrow(), vec!["main", "quiet", "broken", "crashy", "last"]);
    assert_eq!(engine.convention_passes.get(), 1);
}

#[test]
fn whitespace_only_output_counts_as_empty() {
    let engine = ScriptedEngine::with(&[("blank", Script::Blank)]);
    let result = decompile_isolated(&engine, &(), &engine.functions[0].0);
    assert_eq!(result, DecompilationResult::Empty);
}

#[test]
fn panics_are_contained_per_function() {
    let engine = ScriptedEngine::with(&[("crashy", Script::Panic)]);
    let result = decompile_isolated(&engine, &(), &engine.functions[0].0);
    assert_eq!(result, DecompilationResult::Failed("engine bug in crashy".into()));
}

#[test]
fn selection_miss_skips_the_loop() {
    let engine = ScriptedEngine::with(&[("main", Script::Code)]);
    let (out, summary) = run_text(&engine, &RunConfig::new(Some("nope".into()), 0));
    assert_eq!(out, "// No function named nope found\n\n");
    assert_eq!(summary.missing.as_deref(), Some("nope"));
    assert!(engine.decompiled.borrow().is_empty());
}

#[test]
fn max_count_limits_decompilation_calls() {
    let engine = ScriptedEngine::with(&[
        ("a", Script::Code),
        ("b", Script::Code),
        ("c", Script::Code),
    ]);
    let (out, summary) = run_text(&engine, &RunConfig::new(None, 2));
    assert_eq!(out, "void a(void) {}\n\nvoid b(void) {}\n\n");
    assert_eq!(summary.selected, 2);
    assert_eq!(*engine.decompiled.borrow(), vec!["a", "b"]);
}

#[test]
fn analysis_failure_is_fatal_and_writes_nothing() {
    let mut engine = ScriptedEngine::with(&[("main", Script::Code)]);
    engine.fail_analysis = true;
    let mut out = Vec::new();
    let err = run(&engine, &RunConfig::default(), &b"binary"[..], &mut out).unwrap_err();
    assert!(matches!(err, PipelineError::Engine(EngineError::Analysis(_))));
    assert!(out.is_empty());
}

#[test]
fn empty_input_is_fatal_before_analysis() {
    let engine = ScriptedEngine::with(&[("main", Script::Code)]);
    let mut out = Vec::new();
    let err = run(&engine, &RunConfig::default(), &b""[..], &mut out).unwrap_err();
    assert!(matches!(err, PipelineError::Load(_)));
    assert!(out.is_empty());
    assert_eq!(engine.convention_passes.get(), 0);
}

#[test]
fn reruns_produce_identical_output() {
    let engine = ScriptedEngine::with(&[("a", Script::Code), ("b", Script::Error)]);
    let config = RunConfig::default().with_format(OutputFormat::JsonLines);
    let (first, _) = run_text(&engine, &config);
    let (second, _) = run_text(&engine, &config);
    assert_eq!(first, second);
    assert_eq!(first.lines().count(), 2);
}

#[test]
fn block_kinds_are_stable_across_runs() {
    use decomp_core::model::ResultKind;

    let engine =
        ScriptedEngine::with(&[("a", Script::Code), ("b", Script::Empty), ("c", Script::Error)]);
    let kinds = |engine: &ScriptedEngine| -> Vec<ResultKind> {
        engine.functions.iter().map(|(f, _)| decompile_isolated(engine, &(), f).kind()).collect()
    };
    let first = kinds(&engine);
    assert_eq!(first, vec![ResultKind::Code, ResultKind::Empty, ResultKind::Failed]);
    assert_eq!(first, kinds(&engine));
}
