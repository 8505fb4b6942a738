//! Engine configuration
//!
//! Every threshold here is a tunable design default. The records are plain
//! serde structs so a whole engine can be described by one JSON document.

use crate::{DefenderError, DefenderResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Number of features in a single traffic-window state vector
pub const STATE_SIZE: usize = 8;

/// OneR-derived importance of each feature, in state-vector order
pub const ONE_R_WEIGHTS: [f64; STATE_SIZE] = [0.18, 0.12, 0.25, 0.15, 0.20, 0.05, 0.02, 0.03];

// =============================================================================
// Agent
// =============================================================================

/// Hyper-parameters of the DDQN agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Features per traffic window
    pub state_size: usize,
    /// Discrete actions (Monitor/RateLimit/Block/Filter)
    pub action_size: usize,
    /// Consecutive windows concatenated into one input
    pub window_size: usize,
    /// Discount factor, in (0, 1)
    pub gamma: f64,
    /// Initial exploration rate
    pub epsilon: f64,
    /// Exploration floor
    pub epsilon_min: f64,
    /// Multiplicative decay applied after each training step
    pub epsilon_decay: f64,
    /// Optimiser step size
    pub learning_rate: f64,
    /// Training steps between hard target-network syncs
    pub target_update_interval: u64,
    /// Replay buffer capacity
    pub replay_capacity: usize,
    /// Optional per-feature re-weighting applied before act/predict/remember
    pub feature_weights: Option<Vec<f64>>,
    /// RNG seed for exploration and replay sampling
    pub seed: Option<u64>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            state_size: STATE_SIZE,
            action_size: 4,
            window_size: 1,
            gamma: 0.95,
            epsilon: 1.0,
            epsilon_min: 0.01,
            epsilon_decay: 0.995,
            learning_rate: 0.001,
            target_update_interval: 100,
            replay_capacity: 10_000,
            feature_weights: None,
            seed: None,
        }
    }
}

impl AgentConfig {
    /// Length of the (windowed) input vector
    pub fn input_size(&self) -> usize {
        self.state_size * self.window_size
    }

    /// Check ranges and cross-field constraints
    pub fn validate(&self) -> DefenderResult<()> {
        if self.state_size == 0 || self.action_size < 2 || self.window_size == 0 {
            return Err(DefenderError::Config(format!(
                "state_size, window_size must be > 0 and action_size >= 2 (got {}, {}, {})",
                self.state_size, self.window_size, self.action_size
            )));
        }
        if !(self.gamma > 0.0 && self.gamma < 1.0) {
            return Err(DefenderError::Config(format!("gamma must be in (0,1), got {}", self.gamma)));
        }
        if !(0.0..=1.0).contains(&self.epsilon_min) || self.epsilon_min > self.epsilon || self.epsilon > 1.0 {
            return Err(DefenderError::Config(format!(
                "epsilon must satisfy 0 <= epsilon_min <= epsilon <= 1 (got {} / {})",
                self.epsilon_min, self.epsilon
            )));
        }
        if !(self.epsilon_decay > 0.0 && self.epsilon_decay <= 1.0) {
            return Err(DefenderError::Config(format!(
                "epsilon_decay must be in (0,1], got {}",
                self.epsilon_decay
            )));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(DefenderError::Config("learning_rate must be positive".into()));
        }
        if self.target_update_interval == 0 || self.replay_capacity == 0 {
            return Err(DefenderError::Config(
                "target_update_interval and replay_capacity must be > 0".into(),
            ));
        }
        if let Some(weights) = &self.feature_weights {
            if weights.len() != self.state_size || weights.iter().any(|w| !w.is_finite()) {
                return Err(DefenderError::Config(format!(
                    "feature_weights needs {} finite entries, got {}",
                    self.state_size,
                    weights.len()
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Feature extraction
// =============================================================================

/// Normalisation ceilings for the feature extractor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Packets per second mapped to 1.0
    pub packet_rate_ceiling: f64,
    /// Distinct source addresses mapped to 1.0
    pub unique_src_ceiling: f64,
    /// Distinct destination addresses mapped to 1.0
    pub unique_dst_ceiling: f64,
    /// `K` in `min(1, ln(bytes + 1) / K)`
    pub volume_log_scale: f64,
    /// Window length assumed when record timestamps give no usable span
    pub default_window_secs: f64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            packet_rate_ceiling: 5000.0,
            unique_src_ceiling: 100.0,
            unique_dst_ceiling: 50.0,
            volume_log_scale: 16.0,
            default_window_secs: 1.0,
        }
    }
}

impl FeatureConfig {
    pub fn validate(&self) -> DefenderResult<()> {
        let ceilings = [
            self.packet_rate_ceiling,
            self.unique_src_ceiling,
            self.unique_dst_ceiling,
            self.volume_log_scale,
            self.default_window_secs,
        ];
        if ceilings.iter().any(|c| !(c.is_finite() && *c > 0.0)) {
            return Err(DefenderError::Config(
                "feature normalisation ceilings must be positive".into(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Episode tracking
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Seconds without a positive detection before an episode closes
    pub grace_period_secs: f64,
    /// Closed episodes retained in memory
    pub history_limit: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: 30.0,
            history_limit: 100,
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> DefenderResult<()> {
        if !(self.grace_period_secs.is_finite() && self.grace_period_secs >= 0.0) {
            return Err(DefenderError::Config(format!(
                "grace_period_secs must be >= 0, got {}",
                self.grace_period_secs
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Mitigation policy
// =============================================================================

/// Decision table thresholds and enforcement durations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Severity above which an open episode is blocked
    pub block_severity: f64,
    /// Severity above which an open episode is rate limited
    pub rate_limit_severity: f64,
    /// Severity above which an open episode is filtered
    pub filter_severity: f64,
    /// Confidence above which a fresh detection is rate limited
    pub rate_limit_confidence: f64,
    /// Confidence above which a fresh detection is filtered
    pub filter_confidence: f64,
    pub block_duration_secs: u64,
    pub rate_limit_duration_secs: u64,
    pub filter_duration_secs: u64,
    pub monitor_duration_secs: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            block_severity: 0.8,
            rate_limit_severity: 0.6,
            filter_severity: 0.4,
            rate_limit_confidence: 0.8,
            filter_confidence: 0.6,
            block_duration_secs: 3600,
            rate_limit_duration_secs: 1800,
            filter_duration_secs: 900,
            monitor_duration_secs: 300,
        }
    }
}

impl PolicyConfig {
    pub fn validate(&self) -> DefenderResult<()> {
        let ordered = self.filter_severity < self.rate_limit_severity
            && self.rate_limit_severity < self.block_severity
            && self.filter_confidence < self.rate_limit_confidence;
        if !ordered {
            return Err(DefenderError::Config(
                "policy thresholds must be strictly ascending".into(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Detector
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Learn from every processed window
    pub online_learning: bool,
    /// Minibatch size for `train_step`
    pub batch_size: usize,
    /// Feature vectors kept for windowed states
    pub traffic_history_limit: usize,
    /// Episodes echoed in each detection result
    pub recent_attacks: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            online_learning: true,
            batch_size: 32,
            traffic_history_limit: 1000,
            recent_attacks: 5,
        }
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Complete configuration of one detector instance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub agent: AgentConfig,
    pub features: FeatureConfig,
    pub tracker: TrackerConfig,
    pub policy: PolicyConfig,
    pub detector: DetectorConfig,
}

impl EngineConfig {
    /// Load from a JSON file
    pub fn load(path: impl AsRef<Path>) -> DefenderResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save to a JSON file
    pub fn save(&self, path: impl AsRef<Path>) -> DefenderResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> DefenderResult<()> {
        self.agent.validate()?;
        if self.agent.state_size != STATE_SIZE {
            return Err(DefenderError::Config(format!(
                "agent.state_size must be {} to match extracted features, got {}",
                STATE_SIZE, self.agent.state_size
            )));
        }
        self.features.validate()?;
        self.tracker.validate()?;
        self.policy.validate()?;
        if self.detector.batch_size == 0 || self.detector.traffic_history_limit < self.agent.window_size {
            return Err(DefenderError::Config(
                "batch_size must be > 0 and history must cover window_size".into(),
            ));
        }
        Ok(())
    }
}
