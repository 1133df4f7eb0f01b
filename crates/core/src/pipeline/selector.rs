use crate::config::{FunctionOrder, RunConfig};
use crate::model::FunctionDescriptor;

/// The exact set of functions a run will decompile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Ordered functions to decompile (possibly empty for a binary with no code).
    Functions(Vec<FunctionDescriptor>),
    /// A name filter matched nothing; the loop is skipped.
    Missing(String),
}

impl Selection {
    pub fn len(&self) -> usize {
        match self {
            Selection::Functions(functions) => functions.len(),
            Selection::Missing(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Apply candidate filtering and scope restriction to an engine's function list.
///
/// Steps, in order: drop PLT stubs, simulated procedures and alignment padding;
/// optionally sort by address; keep exact name matches when a filter is set;
/// keep a prefix of at most `max_functions` entries.
pub fn select_functions(functions: Vec<FunctionDescriptor>, config: &RunConfig) -> Selection {
    let mut selected: Vec<FunctionDescriptor> =
        functions.into_iter().filter(FunctionDescriptor::is_candidate).collect();

    if config.order == FunctionOrder::Address {
        selected.sort_by_key(|f| f.address);
    }

    if let Some(name) = config.function_name() {
        selected.retain(|f| f.name == name);
        if selected.is_empty() {
            return Selection::Missing(name.to_string());
        }
    }

    if let Some(limit) = config.max_functions() {
        selected.truncate(limit);
    }

    Selection::Functions(selected)
}
