use std::io::{self, Write};

use anyhow::{Context, Result};

use decomp_core::model::ToolIdentity;
use decomp_core::services::analysis::EngineKind;

/// Which identity field a metadata flag asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityQuery {
    Name,
    Version,
    Url,
}

/// Text printed for an identity query. `--version` is followed by an empty line.
pub fn render_identity(identity: &ToolIdentity, query: IdentityQuery) -> String {
    match query {
        IdentityQuery::Name => format!("{}\n", identity.name),
        IdentityQuery::Version => format!("{}\n\n", identity.version),
        IdentityQuery::Url => format!("{}\n", identity.homepage),
    }
}

/// Identity of the selected engine. An unknown or unavailable selection
/// answers for the first available engine instead of failing.
pub fn resolve_identity(engine: Option<&str>) -> Result<ToolIdentity> {
    if let Some(name) = engine {
        match name.parse::<EngineKind>().and_then(|kind| kind.identity()) {
            Ok(identity) => return Ok(identity),
            Err(e) => tracing::warn!(error = %e, "answering identity for the default engine"),
        }
    }
    let fallback =
        EngineKind::ALL.into_iter().find(|kind| kind.is_available()).unwrap_or_default();
    Ok(fallback.identity()?)
}

/// Answer an identity query for the selected engine without reading any input.
pub fn identity_command(engine: Option<&str>, query: IdentityQuery) -> Result<()> {
    let identity = resolve_identity(engine)?;
    let mut stdout = io::stdout().lock();
    stdout
        .write_all(render_identity(&identity, query).as_bytes())
        .and_then(|_| stdout.flush())
        .context("Failed to write identity to stdout")?;
    Ok(())
}
