use decomp_core::config::{FunctionOrder, RunConfig};
use decomp_core::model::FunctionDescriptor;
use decomp_core::pipeline::{select_functions, Selection};

fn function(name: &str, address: u64) -> FunctionDescriptor {
    FunctionDescriptor::new(name, address)
}

fn names(selection: &Selection) -> Vec<&str> {
    match selection {
        Selection::Functions(functions) => functions.iter().map(|f| f.name.as_str()).collect(),
        Selection::Missing(_) => panic!("expected functions, got {selection:?}"),
    }
}

fn sample() -> Vec<FunctionDescriptor> {
    let mut plt = function("puts", 0x1030);
    plt.is_plt = true;
    let mut sim = function("malloc", 0x9000);
    sim.is_simprocedure = true;
    let mut pad = function("sub_1145", 0x1145);
    pad.is_alignment = true;
    vec![
        function("main", 0x1150),
        plt,
        function("helper", 0x1120),
        sim,
        pad,
        function("_start", 0x1060),
    ]
}

#[test]
fn stubs_simprocedures_and_padding_are_never_selected() {
    let selection = select_functions(sample(), &RunConfig::default());
    assert_eq!(names(&selection), vec!["main", "helper", "_start"]);
}

#[test]
fn engine_order_is_preserved_by_default() {
    let selection = select_functions(sample(), &RunConfig::new(None, 0));
    assert_eq!(names(&selection), vec!["main", "helper", "_start"]);
}

#[test]
fn address_order_sorts_by_entry() {
    let config = RunConfig::new(None, 0).with_order(FunctionOrder::Address);
    let selection = select_functions(sample(), &config);
    assert_eq!(names(&selection), vec!["_start", "helper", "main"]);
}

#[test]
fn max_count_keeps_a_prefix() {
    let selection = select_functions(sample(), &RunConfig::new(None, 2));
    assert_eq!(names(&selection), vec!["main", "helper"]);

    let selection = select_functions(sample(), &RunConfig::new(None, 50));
    assert_eq!(selection.len(), 3);
}

#[test]
fn name_filter_matches_exactly() {
    let selection = select_functions(sample(), &RunConfig::new(Some("helper".into()), 0));
    assert_eq!(names(&selection), vec!["helper"]);

    let selection = select_functions(sample(), &RunConfig::new(Some("help".into()), 0));
    assert_eq!(selection, Selection::Missing("help".into()));
    assert!(selection.is_empty());
}

#[test]
fn name_filter_ignores_excluded_functions() {
    // A PLT stub named like the filter does not count as a match.
    let selection = select_functions(sample(), &RunConfig::new(Some("puts".into()), 0));
    assert_eq!(selection, Selection::Missing("puts".into()));
}

#[test]
fn duplicate_names_all_match_and_are_capped_after_filtering() {
    let functions = vec![function("dup", 0x10), function("other", 0x20), function("dup", 0x30)];
    let selection = select_functions(functions.clone(), &RunConfig::new(Some("dup".into()), 0));
    assert_eq!(names(&selection), vec!["dup", "dup"]);

    let selection = select_functions(functions, &RunConfig::new(Some("dup".into()), 1));
    match selection {
        Selection::Functions(f) => assert_eq!(f[0].address, 0x10),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn binary_without_candidates_selects_nothing() {
    let mut plt = function("printf", 0x1000);
    plt.is_plt = true;
    let selection = select_functions(vec![plt], &RunConfig::default());
    assert_eq!(selection, Selection::Functions(Vec::new()));
}
