//! Attack Episode Tracking
//!
//! Folds a stream of per-window detections into discrete attack episodes.
//!
//! ```text
//!            positive                        negative && now - last > grace
//!   Idle ─────────────────▶ Active ─────────────────────────────────────▶ Idle
//!                            │  ▲
//!                            └──┘ positive: raise confidence/severity maxima
//! ```
//!
//! Timeouts are evaluated by comparing timestamps on each update; no timer
//! runs in the background.

use crate::config::TrackerConfig;
use crate::features::StateVector;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use tracing::info;
use uuid::Uuid;

/// Attack type estimated from the features of the first positive window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttackType {
    #[serde(rename = "TCP SYN Flood")]
    SynFlood,
    #[serde(rename = "UDP Flood")]
    UdpFlood,
    #[serde(rename = "ICMP Flood")]
    IcmpFlood,
    #[serde(rename = "Distributed Flood")]
    DistributedFlood,
    #[serde(rename = "HTTP Flood")]
    HttpFlood,
    #[serde(rename = "Slowloris")]
    Slowloris,
    #[serde(rename = "Unknown Attack")]
    Unknown,
}

impl AttackType {
    pub fn label(&self) -> &'static str {
        match self {
            Self::SynFlood => "TCP SYN Flood",
            Self::UdpFlood => "UDP Flood",
            Self::IcmpFlood => "ICMP Flood",
            Self::DistributedFlood => "Distributed Flood",
            Self::HttpFlood => "HTTP Flood",
            Self::Slowloris => "Slowloris",
            Self::Unknown => "Unknown Attack",
        }
    }
}

impl fmt::Display for AttackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// First matching rule wins
pub fn estimate_attack_type(features: &StateVector) -> AttackType {
    let f = features;
    if f.syn_ratio > 0.6 {
        AttackType::SynFlood
    } else if f.protocol_imbalance < 0.3 && f.packet_rate > 0.7 {
        AttackType::UdpFlood
    } else if f.destination_entropy < 0.2 && f.packet_rate > 0.6 {
        AttackType::IcmpFlood
    } else if f.traffic_volume > 0.7 && f.unique_src_count > 0.6 {
        AttackType::DistributedFlood
    } else if f.syn_ratio < 0.3 && f.traffic_volume > 0.5 {
        AttackType::HttpFlood
    } else if f.packet_rate < 0.4 && f.traffic_volume < 0.4 {
        AttackType::Slowloris
    } else {
        AttackType::Unknown
    }
}

/// Weighted severity in [0, 1]
pub fn estimate_severity(features: &StateVector) -> f64 {
    let f = features;
    let severity = 0.4 * f.traffic_volume
        + 0.3 * f.packet_rate
        + 0.15 * f.syn_ratio
        + 0.1 * f.source_entropy
        + 0.05 * (1.0 - f.destination_entropy);
    if severity.is_finite() {
        severity.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// One contiguous attack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackEpisode {
    pub id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub attack_type: AttackType,
    /// Running maximum
    pub confidence: f64,
    /// Running maximum
    pub severity: f64,
    /// Severity of the latest positive window
    pub current_severity: f64,
    pub last_detection_time: DateTime<Utc>,
    pub detections: u64,
    /// Features of the window that opened the episode
    pub features: StateVector,
}

impl AttackEpisode {
    fn open(now: DateTime<Utc>, confidence: f64, features: &StateVector) -> Self {
        let severity = estimate_severity(features);
        Self {
            id: Uuid::new_v4(),
            start_time: now,
            end_time: None,
            attack_type: estimate_attack_type(features),
            confidence: unit(confidence),
            severity,
            current_severity: severity,
            last_detection_time: now,
            detections: 1,
            features: *features,
        }
    }

    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }

    /// Closed episodes: `end - start`; open ones: `now - start`
    pub fn duration(&self, now: DateTime<Utc>) -> Duration {
        self.end_time.unwrap_or(now) - self.start_time
    }

    pub fn duration_secs(&self, now: DateTime<Utc>) -> f64 {
        self.duration(now).num_milliseconds() as f64 / 1000.0
    }

    pub fn summary(&self, now: DateTime<Utc>) -> CurrentAttack {
        CurrentAttack {
            attack_type: self.attack_type,
            start_time: self.start_time,
            duration_secs: self.duration_secs(now),
            severity: self.severity,
        }
    }
}

/// The open episode as reported alongside a detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentAttack {
    #[serde(rename = "type")]
    pub attack_type: AttackType,
    pub start_time: DateTime<Utc>,
    #[serde(rename = "duration")]
    pub duration_secs: f64,
    pub severity: f64,
}

fn unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerState {
    Idle,
    Active,
}

/// Outcome of one tracker update
#[derive(Debug, Clone, PartialEq)]
pub enum EpisodeEvent {
    Started(AttackEpisode),
    Continued,
    Ended(AttackEpisode),
    Unchanged,
}

/// At most one open episode at a time; closed episodes kept up to the history limit
#[derive(Debug)]
pub struct AttackEpisodeTracker {
    config: TrackerConfig,
    current: Option<AttackEpisode>,
    history: VecDeque<AttackEpisode>,
}

impl AttackEpisodeTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            current: None,
            history: VecDeque::new(),
        }
    }

    pub fn state(&self) -> TrackerState {
        if self.current.is_some() {
            TrackerState::Active
        } else {
            TrackerState::Idle
        }
    }

    pub fn current(&self) -> Option<&AttackEpisode> {
        self.current.as_ref()
    }

    fn grace(&self) -> Duration {
        Duration::milliseconds((self.config.grace_period_secs * 1000.0) as i64)
    }

    /// Advance the state machine with one detection
    pub fn update(
        &mut self,
        now: DateTime<Utc>,
        is_attack: bool,
        confidence: f64,
        features: &StateVector,
    ) -> EpisodeEvent {
        let grace = self.grace();
        match (self.current.as_mut(), is_attack) {
            (None, true) => {
                let episode = AttackEpisode::open(now, confidence, features);
                info!(
                    "Attack episode {} started: {} (severity {:.2})",
                    episode.id, episode.attack_type, episode.severity
                );
                self.current = Some(episode.clone());
                EpisodeEvent::Started(episode)
            }
            (Some(episode), true) => {
                let severity = estimate_severity(features);
                episode.last_detection_time = now;
                episode.detections += 1;
                episode.confidence = episode.confidence.max(unit(confidence));
                episode.severity = episode.severity.max(severity);
                episode.current_severity = severity;
                EpisodeEvent::Continued
            }
            (Some(episode), false) if now - episode.last_detection_time > grace => {
                self.close(now)
            }
            _ => EpisodeEvent::Unchanged,
        }
    }

    fn close(&mut self, now: DateTime<Utc>) -> EpisodeEvent {
        let Some(mut episode) = self.current.take() else {
            return EpisodeEvent::Unchanged;
        };
        episode.end_time = Some(now);
        info!(
            "Attack episode {} ended after {:.1}s ({} detections)",
            episode.id,
            episode.duration_secs(now),
            episode.detections
        );

        self.history.push_back(episode.clone());
        while self.history.len() > self.config.history_limit {
            self.history.pop_front();
        }
        EpisodeEvent::Ended(episode)
    }

    /// Latest `limit` episodes, oldest first, including the open one
    pub fn recent(&self, limit: usize) -> Vec<AttackEpisode> {
        let all: Vec<&AttackEpisode> = self.history.iter().chain(self.current.iter()).collect();
        let start = all.len().saturating_sub(limit);
        all[start..].iter().map(|e| (*e).clone()).collect()
    }

    /// Closed episodes retained
    pub fn closed_count(&self) -> usize {
        self.history.len()
    }

    pub fn reset(&mut self) {
        self.current = None;
        self.history.clear();
    }
}

impl Default for AttackEpisodeTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn attack_features() -> StateVector {
        StateVector::from_array([0.98, 0.0, 0.95, 0.55, 0.02, 0.8, 0.02, 0.0])
    }

    fn run(tracker: &mut AttackEpisodeTracker, schedule: &[(i64, bool)]) -> Vec<EpisodeEvent> {
        let start = DateTime::parse_from_rfc3339("2024-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        schedule
            .iter()
            .map(|&(offset, attack)| {
                tracker.update(start + Duration::seconds(offset), attack, 0.7, &attack_features())
            })
            .collect()
    }

    #[test]
    fn test_episode_stays_open_within_grace() {
        let mut tracker = AttackEpisodeTracker::default();
        let events = run(&mut tracker, &[(0, true), (1, true), (2, true), (3, false), (4, false)]);

        assert!(matches!(events[0], EpisodeEvent::Started(_)));
        assert_eq!(events[1], EpisodeEvent::Continued);
        assert_eq!(events[4], EpisodeEvent::Unchanged);
        assert_eq!(tracker.state(), TrackerState::Active);
        assert_eq!(tracker.current().unwrap().detections, 3);
        assert_eq!(tracker.closed_count(), 0);
    }

    #[test]
    fn test_episode_closes_after_gap() {
        let mut tracker = AttackEpisodeTracker::default();
        let events = run(&mut tracker, &[(0, true), (1, true), (2, true), (3, false), (43, false)]);

        match &events[4] {
            EpisodeEvent::Ended(episode) => {
                assert_eq!(episode.duration_secs(Utc::now()), 43.0);
                assert!(!episode.is_open());
            }
            other => panic!("expected Ended, got {:?}", other),
        }
        assert_eq!(tracker.state(), TrackerState::Idle);
        assert_eq!(tracker.recent(10).len(), 1);
    }

    #[test]
    fn test_positive_after_gap_continues() {
        let mut tracker = AttackEpisodeTracker::default();
        let events = run(&mut tracker, &[(0, true), (100, true)]);
        assert_eq!(events[1], EpisodeEvent::Continued);
        assert_eq!(tracker.state(), TrackerState::Active);
    }

    #[test]
    fn test_maxima_never_decrease() {
        let mut tracker = AttackEpisodeTracker::default();
        let now = Utc::now();
        let strong = StateVector::from_array([1.0, 0.0, 1.0, 1.0, 1.0, 1.0, 0.0, 0.0]);
        let weak = StateVector::from_array([0.1, 0.9, 0.0, 0.1, 0.0, 0.1, 0.5, 0.5]);

        tracker.update(now, true, 0.9, &strong);
        tracker.update(now + Duration::seconds(1), true, 0.2, &weak);

        let episode = tracker.current().unwrap();
        assert_eq!(episode.confidence, 0.9);
        assert_eq!(episode.severity, estimate_severity(&strong));
        assert_eq!(episode.current_severity, estimate_severity(&weak));
        assert_eq!(episode.attack_type, AttackType::SynFlood);
    }

    #[test]
    fn test_history_limit() {
        let mut tracker = AttackEpisodeTracker::new(TrackerConfig {
            grace_period_secs: 0.0,
            history_limit: 3,
        });
        let mut schedule = Vec::new();
        for i in 0..5 {
            schedule.push((i * 10, true));
            schedule.push((i * 10 + 5, false));
        }
        run(&mut tracker, &schedule);
        assert_eq!(tracker.closed_count(), 3);
        assert_eq!(tracker.recent(2).len(), 2);
    }

    #[test]
    fn test_attack_type_rules() {
        let of = |v: [f64; 8]| estimate_attack_type(&StateVector::from_array(v));
        assert_eq!(of([0.0, 0.0, 0.9, 0.0, 0.0, 0.0, 0.0, 0.0]), AttackType::SynFlood);
        assert_eq!(of([0.0, 0.5, 0.0, 0.5, 0.9, 0.0, 0.0, 0.1]), AttackType::UdpFlood);
        assert_eq!(of([0.0, 0.1, 0.0, 0.5, 0.65, 0.0, 0.0, 0.5]), AttackType::IcmpFlood);
        assert_eq!(of([0.0, 0.5, 0.4, 0.8, 0.5, 0.7, 0.0, 0.5]), AttackType::DistributedFlood);
        assert_eq!(of([0.0, 0.5, 0.1, 0.6, 0.5, 0.1, 0.0, 0.5]), AttackType::HttpFlood);
        assert_eq!(of([0.0, 0.5, 0.4, 0.2, 0.1, 0.1, 0.0, 0.5]), AttackType::Slowloris);
        assert_eq!(of([0.0, 0.5, 0.4, 0.45, 0.5, 0.1, 0.0, 0.5]), AttackType::Unknown);
        assert_eq!(AttackType::SynFlood.to_string(), "TCP SYN Flood");
    }

    proptest! {
        #[test]
        fn prop_severity_in_unit_interval(values in proptest::array::uniform8(0.0f64..=1.0)) {
            let severity = estimate_severity(&StateVector::from_array(values));
            prop_assert!((0.0..=1.0).contains(&severity));
        }
    }
}
