//! Subcommand handlers

pub mod config;
pub mod detect;
pub mod inspect;
pub mod train;

use anyhow::{Context, Result};
use defender_core::EngineConfig;
use serde::Serialize;
use std::path::Path;
use tracing::warn;

/// Engine configuration from `path`; defaults when no file is given or it does not exist
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    if !path.exists() {
        warn!("Config file {} not found, using defaults", path.display());
        return Ok(EngineConfig::default());
    }
    EngineConfig::load(path).with_context(|| format!("invalid config file {}", path.display()))
}

/// Pretty JSON on stdout
pub fn print_json<T: Serialize>(data: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(data)?);
    Ok(())
}
