use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

use batch_decomp::commands::{render_identity, resolve_identity, IdentityQuery};
use decomp_core::model::ToolIdentity;

#[test]
fn version_prints_version_then_blank_line() {
    let identity = ToolIdentity {
        name: "capstone".into(),
        version: "5.0".into(),
        homepage: "https://www.capstone-engine.org/".into(),
    };
    assert_eq!(render_identity(&identity, IdentityQuery::Version), "5.0\n\n");
    assert_eq!(render_identity(&identity, IdentityQuery::Name), "capstone\n");
    assert_eq!(render_identity(&identity, IdentityQuery::Url), "https://www.capstone-engine.org/\n");
}

#[test]
fn identity_flags_do_not_read_stdin() {
    for flag in ["--version", "--name", "--url"] {
        cargo_bin_cmd!("batch-decomp")
            .arg(flag)
            .write_stdin("this is not a binary")
            .assert()
            .success()
            .stdout(predicate::str::is_empty().not());
    }
}

#[test]
fn manifest_identity_via_flags() {
    cargo_bin_cmd!("batch-decomp")
        .args(["--engine", "manifest", "--name"])
        .assert()
        .success()
        .stdout("manifest\n");

    let output = cargo_bin_cmd!("batch-decomp")
        .args(["--engine", "manifest", "--version"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).unwrap();
    assert_eq!(text, format!("{}\n\n", decomp_core::version()));

    cargo_bin_cmd!("batch-decomp")
        .env("DECOMP_ENGINE", "manifest")
        .arg("--url")
        .assert()
        .success()
        .stdout("https://www.json.org/\n");
}

#[test]
fn identity_flags_ignore_run_configuration() {
    cargo_bin_cmd!("batch-decomp")
        .env("DECOMP_MAX_FUNCTIONS", "not-a-number")
        .arg("--name")
        .assert()
        .success();
}

#[test]
fn unknown_engine_still_answers_identity() {
    cargo_bin_cmd!("batch-decomp")
        .env("DECOMP_ENGINE", "bogus")
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::ends_with("\n\n"))
        .stderr(predicate::str::contains("Unknown engine 'bogus'"));

    let fallback = resolve_identity(Some("ida")).unwrap();
    assert_eq!(fallback, resolve_identity(None).unwrap());
}

#[test]
fn unknown_engine_is_rejected_for_runs() {
    cargo_bin_cmd!("batch-decomp")
        .args(["--engine", "ida"])
        .write_stdin("irrelevant")
        .assert()
        .failure()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("Unknown engine 'ida'"));
}
