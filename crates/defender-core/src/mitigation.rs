//! Mitigation Policy
//!
//! Pure decision table from a detection and the open episode (if any) to a
//! recommended action with an enforcement duration.

use crate::config::PolicyConfig;
use crate::episode::{AttackType, CurrentAttack};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Discrete action space of the agent, in index order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MitigationAction {
    Monitor,
    /// Throttle suspicious sources
    RateLimit,
    Block,
    /// Deep traffic analysis
    Filter,
}

impl MitigationAction {
    pub const ALL: [MitigationAction; 4] = [Self::Monitor, Self::RateLimit, Self::Block, Self::Filter];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Monitor => "monitor",
            Self::RateLimit => "rate_limit",
            Self::Block => "block",
            Self::Filter => "filter",
        }
    }
}

impl fmt::Display for MitigationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeverityLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// What the enforcement point should act on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MitigationTarget {
    Source,
    SpecificSources,
    TrafficPatterns,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub action: MitigationAction,
    pub description: String,
    pub severity: SeverityLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<MitigationTarget>,
    /// Enforcement duration; null when there is nothing to enforce
    #[serde(rename = "duration")]
    pub duration_secs: Option<u64>,
}

impl Recommendation {
    fn new(action: MitigationAction, severity: SeverityLevel, description: impl Into<String>) -> Self {
        Self {
            action,
            description: description.into(),
            severity,
            target: None,
            duration_secs: None,
        }
    }

    fn targeting(mut self, target: MitigationTarget) -> Self {
        self.target = Some(target);
        self
    }

    fn lasting(mut self, secs: u64) -> Self {
        self.duration_secs = Some(secs);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct MitigationPolicy {
    config: PolicyConfig,
}

impl MitigationPolicy {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Recommend an action for one detection
    ///
    /// An open episode is judged by its severity; a fresh detection with no
    /// open episode falls back to the raw confidence.
    pub fn recommend(&self, is_attack: bool, confidence: f64, current: Option<&CurrentAttack>) -> Recommendation {
        let c = &self.config;
        match current {
            Some(attack) => self.for_episode(attack.severity, attack.attack_type),
            None if !is_attack => {
                Recommendation::new(MitigationAction::Monitor, SeverityLevel::Low, "Continue monitoring traffic.")
            }
            None if confidence > c.rate_limit_confidence => Recommendation::new(
                MitigationAction::RateLimit,
                SeverityLevel::High,
                "Throttle bandwidth for suspicious sources.",
            )
            .lasting(c.rate_limit_duration_secs),
            None if confidence > c.filter_confidence => Recommendation::new(
                MitigationAction::Filter,
                SeverityLevel::Medium,
                "Run deep traffic analysis.",
            )
            .lasting(c.filter_duration_secs),
            None => Recommendation::new(
                MitigationAction::Monitor,
                SeverityLevel::Low,
                "Continue monitoring traffic with heightened attention.",
            )
            .lasting(c.monitor_duration_secs),
        }
    }

    fn for_episode(&self, severity: f64, attack_type: AttackType) -> Recommendation {
        let c = &self.config;
        if severity > c.block_severity {
            Recommendation::new(
                MitigationAction::Block,
                SeverityLevel::Critical,
                format!("Block source traffic. Severe {} detected.", attack_type),
            )
            .targeting(MitigationTarget::Source)
            .lasting(c.block_duration_secs)
        } else if severity > c.rate_limit_severity {
            Recommendation::new(
                MitigationAction::RateLimit,
                SeverityLevel::High,
                format!("Throttle bandwidth for suspicious sources. Moderate {} detected.", attack_type),
            )
            .targeting(MitigationTarget::SpecificSources)
            .lasting(c.rate_limit_duration_secs)
        } else if severity > c.filter_severity {
            Recommendation::new(
                MitigationAction::Filter,
                SeverityLevel::Medium,
                format!("Run deep traffic analysis. Low-intensity {} detected.", attack_type),
            )
            .targeting(MitigationTarget::TrafficPatterns)
            .lasting(c.filter_duration_secs)
        } else {
            Recommendation::new(
                MitigationAction::Monitor,
                SeverityLevel::Low,
                format!("Continue monitoring traffic. Possible very low-intensity {}.", attack_type),
            )
            .lasting(c.monitor_duration_secs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn open_episode(severity: f64) -> CurrentAttack {
        CurrentAttack {
            attack_type: AttackType::SynFlood,
            start_time: Utc::now(),
            duration_secs: 12.0,
            severity,
        }
    }

    #[test]
    fn test_quiet_traffic_monitors() {
        let policy = MitigationPolicy::default();
        let rec = policy.recommend(false, 0.1, None);
        assert_eq!(rec.action, MitigationAction::Monitor);
        assert_eq!(rec.severity, SeverityLevel::Low);
        assert_eq!(rec.duration_secs, None);
    }

    #[test]
    fn test_open_episode_table() {
        let policy = MitigationPolicy::default();
        let cases = [
            (0.95, MitigationAction::Block, SeverityLevel::Critical, 3600),
            (0.8, MitigationAction::RateLimit, SeverityLevel::High, 1800),
            (0.61, MitigationAction::RateLimit, SeverityLevel::High, 1800),
            (0.6, MitigationAction::Filter, SeverityLevel::Medium, 900),
            (0.4, MitigationAction::Monitor, SeverityLevel::Low, 300),
        ];
        for (severity, action, level, duration) in cases {
            let episode = open_episode(severity);
            // the episode table applies even when the current window is negative
            let rec = policy.recommend(false, 0.0, Some(&episode));
            assert_eq!(rec.action, action, "severity {}", severity);
            assert_eq!(rec.severity, level);
            assert_eq!(rec.duration_secs, Some(duration));
        }
    }

    #[test]
    fn test_fresh_detection_uses_confidence() {
        let policy = MitigationPolicy::default();
        assert_eq!(policy.recommend(true, 0.9, None).action, MitigationAction::RateLimit);
        assert_eq!(policy.recommend(true, 0.7, None).action, MitigationAction::Filter);
        let low = policy.recommend(true, 0.3, None);
        assert_eq!(low.action, MitigationAction::Monitor);
        assert_eq!(low.duration_secs, Some(300));
    }

    #[test]
    fn test_action_indices() {
        for (i, action) in MitigationAction::ALL.iter().enumerate() {
            assert_eq!(MitigationAction::from_index(i), Some(*action));
            assert_eq!(action.index(), i);
        }
        assert_eq!(MitigationAction::from_index(4), None);
        assert_eq!(serde_json::to_string(&MitigationAction::RateLimit).unwrap(), "\"rate_limit\"");
    }
}
