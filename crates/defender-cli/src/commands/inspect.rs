//! Inspect command

use super::print_json;
use anyhow::{Context, Result};
use defender_core::persistence::{decode_parameters, sidecar_path, ModelSidecar};
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Serialize)]
struct ModelReport {
    model: String,
    blob_bytes: usize,
    parameters: usize,
    finite: bool,
    sidecar: Option<ModelSidecar>,
}

pub fn handle(model: &Path) -> Result<()> {
    let bytes = std::fs::read(model).with_context(|| format!("cannot read {}", model.display()))?;
    let params = decode_parameters(&bytes).with_context(|| format!("{} is not a model blob", model.display()))?;
    let sidecar = ModelSidecar::read(sidecar_path(model)).ok();

    print_json(&ModelReport {
        model: model.display().to_string(),
        blob_bytes: bytes.len(),
        parameters: params.len(),
        finite: params.iter().all(|p| p.is_finite()),
        sidecar,
    })
}
