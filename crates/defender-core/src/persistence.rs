//! Model persistence
//!
//! A model is two files: the parameter blob (`DDQN` magic, `u32` format
//! version, `u64` parameter count, little-endian `f64`s) and a JSON sidecar
//! `<stem>_config.json` describing the agent that produced it.
//!
//! Loading validates the sidecar first. A shape mismatch is fatal; anything
//! missing or corrupt leaves the agent on its fresh parameters.

use crate::agent::DdqnAgent;
use crate::approximator::ValueApproximator;
use crate::config::AgentConfig;
use crate::{DefenderError, DefenderResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const MAGIC: &[u8; 4] = b"DDQN";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 8;

/// Configuration record stored next to a parameter blob
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSidecar {
    pub state_size: usize,
    pub action_size: usize,
    pub window_size: usize,
    pub gamma: f64,
    pub epsilon: f64,
    pub epsilon_min: f64,
    pub epsilon_decay: f64,
    pub learning_rate: f64,
    pub saved_at: DateTime<Utc>,
}

impl ModelSidecar {
    pub fn describe(config: &AgentConfig, epsilon: f64) -> Self {
        Self {
            state_size: config.state_size,
            action_size: config.action_size,
            window_size: config.window_size,
            gamma: config.gamma,
            epsilon,
            epsilon_min: config.epsilon_min,
            epsilon_decay: config.epsilon_decay,
            learning_rate: config.learning_rate,
            saved_at: Utc::now(),
        }
    }

    pub fn read(path: impl AsRef<Path>) -> DefenderResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn write(&self, path: impl AsRef<Path>) -> DefenderResult<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Shape fields must match the running agent exactly
    pub fn check_compatible(&self, config: &AgentConfig) -> DefenderResult<()> {
        let checks = [
            ("state_size", config.state_size, self.state_size),
            ("window_size", config.window_size, self.window_size),
            ("action_size", config.action_size, self.action_size),
        ];
        for (field, expected, found) in checks {
            if expected != found {
                return Err(DefenderError::ConfigMismatch {
                    field,
                    expected: expected.to_string(),
                    found: found.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// `model.bin` → `model_config.json` in the same directory
pub fn sidecar_path(model_path: impl AsRef<Path>) -> PathBuf {
    let model_path = model_path.as_ref();
    let stem = model_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "model".to_string());
    model_path.with_file_name(format!("{}_config.json", stem))
}

pub fn encode_parameters(params: &[f64]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_LEN + params.len() * 8);
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    bytes.extend_from_slice(&(params.len() as u64).to_le_bytes());
    for p in params {
        bytes.extend_from_slice(&p.to_le_bytes());
    }
    bytes
}

pub fn decode_parameters(bytes: &[u8]) -> DefenderResult<Vec<f64>> {
    if bytes.len() < HEADER_LEN || &bytes[..4] != MAGIC {
        return Err(DefenderError::ModelLoad("not a DDQN parameter blob".into()));
    }
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[4..8]);
    let version = u32::from_le_bytes(word);
    if version != FORMAT_VERSION {
        return Err(DefenderError::ModelLoad(format!("unsupported blob version {}", version)));
    }
    let mut count = [0u8; 8];
    count.copy_from_slice(&bytes[8..HEADER_LEN]);
    let count = usize::try_from(u64::from_le_bytes(count))
        .map_err(|_| DefenderError::ModelLoad("blob parameter count exceeds address space".into()))?;

    let body = &bytes[HEADER_LEN..];
    if count.checked_mul(8) != Some(body.len()) {
        return Err(DefenderError::ModelLoad(format!(
            "blob declares {} parameters but carries {} bytes",
            count,
            body.len()
        )));
    }
    Ok(body
        .chunks_exact(8)
        .map(|chunk| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(chunk);
            f64::from_le_bytes(raw)
        })
        .collect())
}

/// Write blob and sidecar; returns the sidecar path
pub fn save_agent<A: ValueApproximator>(agent: &DdqnAgent<A>, path: impl AsRef<Path>) -> DefenderResult<PathBuf> {
    let path = path.as_ref();
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, encode_parameters(&agent.parameters()))?;

    let sidecar = sidecar_path(path);
    ModelSidecar::describe(agent.config(), agent.epsilon()).write(&sidecar)?;
    info!("Model saved to {} ({} parameters)", path.display(), agent.parameters().len());
    Ok(sidecar)
}

/// What a load attempt left the agent with
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    Loaded { parameters: usize, epsilon: f64 },
    Fresh { reason: String },
}

impl LoadOutcome {
    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded { .. })
    }
}

/// Load a persisted model into `agent`
///
/// Only [`DefenderError::ConfigMismatch`] is returned as an error; every
/// other failure is logged and reported as [`LoadOutcome::Fresh`].
pub fn load_agent<A: ValueApproximator>(
    agent: &mut DdqnAgent<A>,
    path: impl AsRef<Path>,
) -> DefenderResult<LoadOutcome> {
    let path = path.as_ref();

    let sidecar = match ModelSidecar::read(sidecar_path(path)) {
        Ok(sidecar) => Some(sidecar),
        Err(e) => {
            warn!("Model sidecar for {} unusable ({}), skipping validation", path.display(), e);
            None
        }
    };
    if let Some(sidecar) = &sidecar {
        sidecar.check_compatible(agent.config())?;
    }

    let params = match std::fs::read(path)
        .map_err(DefenderError::from)
        .and_then(|bytes| decode_parameters(&bytes))
    {
        Ok(params) => params,
        Err(e) => return Ok(fresh(path, e)),
    };
    if let Err(e) = agent.load_parameters(&params) {
        return Ok(fresh(path, e));
    }

    if let Some(sidecar) = &sidecar {
        agent.set_epsilon(sidecar.epsilon.max(agent.config().epsilon_min));
    }
    info!("Model loaded from {}", path.display());
    Ok(LoadOutcome::Loaded {
        parameters: params.len(),
        epsilon: agent.epsilon(),
    })
}

fn fresh(path: &Path, error: DefenderError) -> LoadOutcome {
    warn!("Could not load model from {}: {}; using fresh parameters", path.display(), error);
    LoadOutcome::Fresh {
        reason: error.to_string(),
    }
}
