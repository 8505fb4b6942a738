//! Labeled traffic datasets
//!
//! A dataset is a JSON document with `train`, `validation` and `test` lists
//! of episodes. Each episode holds one 8-value feature array and one attack
//! label per traffic window.

use crate::config::STATE_SIZE;
use crate::features::{StateVector, WindowedState};
use crate::{DefenderError, DefenderResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawEpisode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    episode_id: Option<serde_json::Value>,
    features: Vec<[f64; STATE_SIZE]>,
    attack_labels: Vec<bool>,
}

/// One recorded sequence of windows with ground truth
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawEpisode", into = "RawEpisode")]
pub struct LabeledEpisode {
    pub episode_id: Option<String>,
    features: Vec<StateVector>,
    attack_labels: Vec<bool>,
}

impl LabeledEpisode {
    pub fn new(features: Vec<StateVector>, attack_labels: Vec<bool>) -> DefenderResult<Self> {
        if features.len() != attack_labels.len() {
            return Err(DefenderError::Input(format!(
                "episode has {} feature rows but {} labels",
                features.len(),
                attack_labels.len()
            )));
        }
        Ok(Self {
            episode_id: None,
            features,
            attack_labels,
        })
    }

    pub fn features(&self) -> &[StateVector] {
        &self.features
    }

    pub fn attack_labels(&self) -> &[bool] {
        &self.attack_labels
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Windowed input for `step`, front-padded while history is short
    pub fn state_at(&self, step: usize, window_size: usize) -> Vec<f64> {
        let end = (step + 1).min(self.features.len());
        WindowedState::from_history(&self.features[..end], window_size).to_vec()
    }
}

impl TryFrom<RawEpisode> for LabeledEpisode {
    type Error = DefenderError;

    fn try_from(raw: RawEpisode) -> Result<Self, Self::Error> {
        let features = raw.features.into_iter().map(StateVector::from_array).collect();
        let mut episode = Self::new(features, raw.attack_labels)?;
        episode.episode_id = raw.episode_id.map(|id| match id {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        });
        Ok(episode)
    }
}

impl From<LabeledEpisode> for RawEpisode {
    fn from(episode: LabeledEpisode) -> Self {
        Self {
            episode_id: episode.episode_id.map(serde_json::Value::String),
            features: episode.features.iter().map(StateVector::to_array).collect(),
            attack_labels: episode.attack_labels,
        }
    }
}

/// Full windows only: each input ends at a labeled step and spans `window_size` rows
pub fn sliding_windows(episode: &LabeledEpisode, window_size: usize) -> Vec<(Vec<f64>, bool)> {
    let window_size = window_size.max(1);
    if episode.len() < window_size {
        return Vec::new();
    }
    (window_size - 1..episode.len())
        .map(|end| {
            let input = episode.features[end + 1 - window_size..=end]
                .iter()
                .flat_map(StateVector::to_array)
                .collect();
            (input, episode.attack_labels[end])
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub train: Vec<LabeledEpisode>,
    #[serde(default)]
    pub validation: Vec<LabeledEpisode>,
    #[serde(default)]
    pub test: Vec<LabeledEpisode>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Dataset {
    pub fn load(path: impl AsRef<Path>) -> DefenderResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let dataset: Self = serde_json::from_str(&content)?;
        if dataset.train.is_empty() {
            return Err(DefenderError::Input("dataset has no training episodes".into()));
        }
        Ok(dataset)
    }

    /// Samples for evaluation: the test split, or validation when no test split exists
    pub fn evaluation_samples(&self, window_size: usize) -> Vec<(Vec<f64>, bool)> {
        let split = if self.test.is_empty() { &self.validation } else { &self.test };
        split.iter().flat_map(|e| sliding_windows(e, window_size)).collect()
    }
}
