//! Config command

use anyhow::{Context, Result};
use defender_core::EngineConfig;
use std::path::Path;
use tracing::info;

pub fn handle(out: &Path) -> Result<()> {
    EngineConfig::default()
        .save(out)
        .with_context(|| format!("cannot write {}", out.display()))?;
    info!("Default configuration written to {}", out.display());
    Ok(())
}
