//! DDQN Detector
//!
//! One detector instance owns the whole decision path for a traffic segment:
//! feature extraction, agent decision, episode tracking, mitigation policy
//! and (optionally) online learning and episode persistence.
//!
//! Detection never fails. Bad windows become the zero vector, an unusable
//! primary approximator falls back to the heuristic, and sink failures are
//! only logged and counted.

use crate::agent::DdqnAgent;
use crate::approximator::{argmax, BackendKind, HeuristicApproximator, ValueApproximator};
use crate::config::EngineConfig;
use crate::dataset::Dataset;
use crate::episode::{AttackEpisode, AttackEpisodeTracker, CurrentAttack, EpisodeEvent};
use crate::evaluation::{evaluate_agent, EvaluationMetrics};
use crate::features::{FeatureExtractor, StateVector, TrafficRecord, WindowedState};
use crate::metrics::DetectorMetrics;
use crate::mitigation::{MitigationAction, MitigationPolicy, Recommendation};
use crate::persistence::{self, LoadOutcome};
use crate::reward::{labeled_reward, self_supervised_reward};
use crate::sink::{AttackAlert, EpisodeSink};
use crate::worker::{SharedAgent, TrainingHandle};
use crate::{DefenderError, DefenderResult};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Outcome of processing one traffic window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub timestamp: DateTime<Utc>,
    pub is_attack: bool,
    pub confidence: f64,
    pub action: usize,
    pub mitigation_action: Option<MitigationAction>,
    pub q_values: Vec<f64>,
    pub attack_in_progress: bool,
    pub current_attack: Option<CurrentAttack>,
    pub recommended_action: Recommendation,
    pub features: StateVector,
    pub recent_attacks: Vec<AttackEpisode>,
    pub backend: BackendKind,
}

/// How a processed window feeds online learning
#[derive(Debug, Clone, Copy, PartialEq)]
enum Learning {
    Off,
    SelfSupervised,
    Labeled(bool),
}

/// Previous cycle, completed into a transition by the next window
#[derive(Debug, Clone)]
struct PendingTransition {
    state: Vec<f64>,
    action: usize,
    reward: f64,
}

struct Decision {
    action: usize,
    q_values: Vec<f64>,
    backend: BackendKind,
}

pub struct DdqnDetector {
    config: EngineConfig,
    extractor: FeatureExtractor,
    agent: SharedAgent,
    fallback: HeuristicApproximator,
    tracker: AttackEpisodeTracker,
    policy: MitigationPolicy,
    history: VecDeque<StateVector>,
    pending: Option<PendingTransition>,
    sink: Option<Box<dyn EpisodeSink>>,
    trainer: Option<TrainingHandle>,
    metrics: Arc<DetectorMetrics>,
}

impl DdqnDetector {
    /// Detector over a freshly initialised network
    pub fn new(config: EngineConfig) -> DefenderResult<Self> {
        let agent = DdqnAgent::new(config.agent.clone())?;
        Self::with_agent(config, agent)
    }

    /// Detector that decides with the threshold heuristic only
    pub fn heuristic(config: EngineConfig) -> DefenderResult<Self> {
        let agent = DdqnAgent::heuristic(config.agent.clone())?;
        Self::with_agent(config, agent)
    }

    pub fn with_agent(config: EngineConfig, agent: DdqnAgent) -> DefenderResult<Self> {
        Self::with_shared_agent(config, Arc::new(Mutex::new(agent)))
    }

    pub fn with_shared_agent(config: EngineConfig, agent: SharedAgent) -> DefenderResult<Self> {
        config.validate()?;
        {
            let agent = agent.lock();
            let shape = (agent.config().input_size(), agent.config().action_size);
            if shape != (config.agent.input_size(), config.agent.action_size) {
                return Err(DefenderError::Config(format!(
                    "agent is {}x{}, detector expects {}x{}",
                    shape.0,
                    shape.1,
                    config.agent.input_size(),
                    config.agent.action_size
                )));
            }
        }
        Ok(Self {
            extractor: FeatureExtractor::new(config.features.clone()),
            fallback: HeuristicApproximator::new(config.agent.window_size, config.agent.action_size),
            tracker: AttackEpisodeTracker::new(config.tracker.clone()),
            policy: MitigationPolicy::new(config.policy.clone()),
            history: VecDeque::with_capacity(config.detector.traffic_history_limit.min(1024)),
            pending: None,
            sink: None,
            trainer: None,
            metrics: Arc::new(DetectorMetrics::new()),
            agent,
            config,
        })
    }

    pub fn with_sink(mut self, sink: impl EpisodeSink + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    /// Hand training to a background worker instead of training inline
    pub fn with_trainer(mut self, trainer: TrainingHandle) -> Self {
        self.trainer = Some(trainer);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<DetectorMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn agent(&self) -> SharedAgent {
        self.agent.clone()
    }

    pub fn metrics(&self) -> Arc<DetectorMetrics> {
        self.metrics.clone()
    }

    pub fn tracker(&self) -> &AttackEpisodeTracker {
        &self.tracker
    }

    // =========================================================================
    // Detection
    // =========================================================================

    /// Process a window observed now, learning online when enabled
    pub fn detect(&mut self, window: &[TrafficRecord]) -> DetectionResult {
        self.detect_at(window, Utc::now(), true)
    }

    /// Process a window observed at `now`
    pub fn detect_at(&mut self, window: &[TrafficRecord], now: DateTime<Utc>, learn: bool) -> DetectionResult {
        let learning = if learn { Learning::SelfSupervised } else { Learning::Off };
        self.process(window, now, learning)
    }

    /// Process a window whose ground truth is known, rewarding against the label
    pub fn detect_labeled(&mut self, window: &[TrafficRecord], now: DateTime<Utc>, is_attack: bool) -> DetectionResult {
        self.process(window, now, Learning::Labeled(is_attack))
    }

    fn process(&mut self, window: &[TrafficRecord], now: DateTime<Utc>, learning: Learning) -> DetectionResult {
        let features = self.extractor.extract_or_zero(window);
        self.history.push_back(features);
        while self.history.len() > self.config.detector.traffic_history_limit {
            self.history.pop_front();
        }

        let state = WindowedState::from_history(self.history.make_contiguous(), self.config.agent.window_size).to_vec();
        let decision = self.decide(&state);
        let is_attack = decision.action != 0;
        let confidence = decision
            .q_values
            .get(decision.action)
            .copied()
            .filter(|q| q.is_finite())
            .map(|q| q.clamp(0.0, 1.0))
            .unwrap_or(0.0);

        let event = self.tracker.update(now, is_attack, confidence, &features);
        let current_attack = self.tracker.current().map(|e| e.summary(now));
        let recommendation = self.policy.recommend(is_attack, confidence, current_attack.as_ref());
        self.record_event(event, &recommendation);

        if learning != Learning::Off && self.config.detector.online_learning {
            self.learn(state, decision.action, is_attack, learning);
        }

        self.metrics.record_window();
        if is_attack {
            self.metrics.record_attack();
        }

        DetectionResult {
            timestamp: now,
            is_attack,
            confidence,
            action: decision.action,
            mitigation_action: MitigationAction::from_index(decision.action),
            q_values: decision.q_values,
            attack_in_progress: current_attack.is_some(),
            current_attack,
            recommended_action: recommendation,
            features,
            recent_attacks: self.tracker.recent(self.config.detector.recent_attacks),
            backend: decision.backend,
        }
    }

    /// Greedy decision of the agent, or of the heuristic when the agent is unusable
    fn decide(&self, state: &[f64]) -> Decision {
        let primary = {
            let agent = self.agent.lock();
            agent.predict(state).map(|(action, q)| (action, q, agent.backend_kind()))
        };
        match primary {
            Ok((action, q_values, backend)) if q_values.iter().all(|q| q.is_finite()) => Decision {
                action,
                q_values,
                backend,
            },
            other => {
                match other {
                    Ok(_) => warn!("Agent produced non-finite values, using heuristic"),
                    Err(e) => warn!("Agent prediction failed ({}), using heuristic", e),
                }
                self.metrics.record_heuristic_fallback();
                let q_values = self
                    .fallback
                    .predict(state)
                    .unwrap_or_else(|_| vec![0.0; self.config.agent.action_size]);
                Decision {
                    action: argmax(&q_values),
                    q_values,
                    backend: BackendKind::Heuristic,
                }
            }
        }
    }

    fn record_event(&mut self, event: EpisodeEvent, recommendation: &Recommendation) {
        match event {
            EpisodeEvent::Started(episode) => {
                self.metrics.record_episode_opened();
                let alert = AttackAlert {
                    id: Uuid::new_v4(),
                    episode_id: episode.id,
                    timestamp: episode.start_time,
                    attack_type: episode.attack_type,
                    confidence: episode.confidence,
                    severity: episode.severity,
                    recommendation: recommendation.clone(),
                };
                if let Some(sink) = self.sink.as_mut() {
                    if let Err(e) = sink.persist_alert(&alert) {
                        warn!("Failed to persist alert {}: {}", alert.id, e);
                        self.metrics.record_persistence_failure();
                    }
                }
            }
            EpisodeEvent::Ended(episode) => {
                self.metrics.record_episode_closed();
                if let Some(sink) = self.sink.as_mut() {
                    if let Err(e) = sink.persist_episode(&episode) {
                        warn!("Failed to persist episode {}: {}", episode.id, e);
                        self.metrics.record_persistence_failure();
                    }
                }
            }
            EpisodeEvent::Continued | EpisodeEvent::Unchanged => {}
        }
    }

    /// Complete the previous cycle's transition with this state, then train
    fn learn(&mut self, state: Vec<f64>, action: usize, is_attack: bool, learning: Learning) {
        if self.history.len() < self.config.agent.window_size {
            return;
        }
        let reward = match learning {
            Learning::Labeled(label) => labeled_reward(action, label, self.config.agent.action_size),
            _ => self_supervised_reward(is_attack),
        };
        let batch_size = self.config.detector.batch_size;

        if let Some(previous) = self.pending.take() {
            let mut agent = self.agent.lock();
            if agent
                .remember(&previous.state, previous.action, previous.reward, &state, false)
                .is_err()
            {
                self.metrics.record_rejected_transition();
            }

            if agent.replay_len() >= batch_size {
                match &self.trainer {
                    Some(trainer) => {
                        trainer.try_submit(batch_size);
                    }
                    None => match agent.train_step(batch_size) {
                        Ok(loss) => {
                            self.metrics.record_training_step();
                            debug!("Online training step, loss {:.5}", loss);
                        }
                        Err(e) => warn!("Online training step failed: {}", e),
                    },
                }
            }
        }

        self.pending = Some(PendingTransition { state, action, reward });
    }

    /// Recommendation for an already computed result
    pub fn recommend(&self, result: &DetectionResult) -> Recommendation {
        self.policy
            .recommend(result.is_attack, result.confidence, result.current_attack.as_ref())
    }

    /// Latest `limit` episodes, oldest first
    pub fn attack_history(&self, limit: usize) -> Vec<AttackEpisode> {
        self.tracker.recent(limit)
    }

    /// Forget traffic history and episodes; the learned model is kept
    pub fn reset(&mut self) {
        self.history.clear();
        self.tracker.reset();
        self.pending = None;
        debug!("Detector state reset");
    }

    // =========================================================================
    // Model management
    // =========================================================================

    pub fn save_model(&self, path: impl AsRef<Path>) -> DefenderResult<PathBuf> {
        persistence::save_agent(&*self.agent.lock(), path)
    }

    /// Load persisted parameters; only a configuration mismatch is an error
    pub fn load_model(&mut self, path: impl AsRef<Path>) -> DefenderResult<LoadOutcome> {
        persistence::load_agent(&mut *self.agent.lock(), path)
    }

    /// Score labeled windows, each evaluated on its own
    pub fn evaluate(&self, samples: &[(Vec<TrafficRecord>, bool)]) -> DefenderResult<EvaluationMetrics> {
        let window = self.config.agent.window_size;
        let inputs: Vec<(Vec<f64>, bool)> = samples
            .iter()
            .map(|(records, label)| {
                let features = self.extractor.extract_or_zero(records);
                (WindowedState::from_history(&[features], window).to_vec(), *label)
            })
            .collect();
        evaluate_agent(&*self.agent.lock(), &inputs)
    }

    /// Score the test split of a dataset (validation when there is none)
    pub fn evaluate_dataset(&self, dataset: &Dataset) -> DefenderResult<EvaluationMetrics> {
        let samples = dataset.evaluation_samples(self.config.agent.window_size);
        evaluate_agent(&*self.agent.lock(), &samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AgentConfig, DetectorConfig};
    use crate::sink::MemorySink;
    use chrono::Duration;

    fn syn_flood() -> Vec<TrafficRecord> {
        (0..100)
            .map(|i| {
                let record = TrafficRecord::new(format!("10.1.0.{}", i % 80), "192.168.1.10", "TCP", 60);
                record.with_flags(if i < 95 { "S" } else { "A" })
            })
            .collect()
    }

    fn benign() -> Vec<TrafficRecord> {
        (0..40)
            .map(|i| {
                TrafficRecord::new(format!("10.0.0.{}", i % 4), format!("172.16.0.{}", i % 20), ["TCP", "UDP"][i % 2], 800)
                    .with_flags("A")
            })
            .collect()
    }

    fn heuristic_detector() -> DdqnDetector {
        let config = EngineConfig {
            agent: AgentConfig {
                seed: Some(5),
                ..Default::default()
            },
            detector: DetectorConfig {
                batch_size: 4,
                ..Default::default()
            },
            ..Default::default()
        };
        DdqnDetector::heuristic(config).unwrap()
    }

    #[test]
    fn test_syn_flood_opens_episode() {
        let mut detector = heuristic_detector();
        let result = detector.detect_at(&syn_flood(), Utc::now(), false);

        assert!(result.is_attack);
        assert_eq!(result.action, 1);
        assert_eq!(result.mitigation_action, Some(MitigationAction::RateLimit));
        assert_eq!(result.backend, BackendKind::Heuristic);
        assert!(result.attack_in_progress);
        assert_eq!(result.recent_attacks.len(), 1);
        let current = result.current_attack.unwrap();
        assert_eq!(current.attack_type.label(), "TCP SYN Flood");
        assert_eq!(current.duration_secs, 0.0);
    }

    #[test]
    fn test_benign_traffic_monitors() {
        let mut detector = heuristic_detector();
        let result = detector.detect_at(&benign(), Utc::now(), false);
        assert!(!result.is_attack);
        assert!(!result.attack_in_progress);
        assert_eq!(result.recommended_action.action, MitigationAction::Monitor);
        assert_eq!(detector.recommend(&result), result.recommended_action);
    }

    #[test]
    fn test_malformed_window_still_returns_result() {
        let mut detector = heuristic_detector();
        let bad = vec![TrafficRecord::new("", "10.0.0.1", "TCP", 60)];
        let result = detector.detect_at(&bad, Utc::now(), false);
        assert_eq!(result.features, StateVector::zero());
        assert!(!result.is_attack);
    }

    #[test]
    fn test_episode_lifecycle_reaches_sink() {
        let sink = MemorySink::new();
        let mut detector = heuristic_detector().with_sink(sink.clone());
        let start = Utc::now();

        detector.detect_at(&syn_flood(), start, false);
        detector.detect_at(&syn_flood(), start + Duration::seconds(1), false);
        detector.detect_at(&benign(), start + Duration::seconds(2), false);
        let result = detector.detect_at(&benign(), start + Duration::seconds(45), false);

        assert!(!result.attack_in_progress);
        assert_eq!(sink.alerts().len(), 1);
        let episodes = sink.episodes();
        assert_eq!(episodes.len(), 1);
        assert_eq!(episodes[0].duration_secs(Utc::now()), 45.0);

        let snapshot = detector.metrics().snapshot();
        assert_eq!(snapshot.windows_processed, 4);
        assert_eq!(snapshot.episodes_opened, 1);
        assert_eq!(snapshot.episodes_closed, 1);
        assert_eq!(detector.attack_history(10).len(), 1);
    }

    #[test]
    fn test_online_learning_pairs_consecutive_windows() {
        let mut detector = heuristic_detector();
        let start = Utc::now();
        for i in 0..6 {
            detector.detect_at(&syn_flood(), start + Duration::seconds(i), true);
        }
        // six windows complete five transitions
        assert_eq!(detector.agent().lock().replay_len(), 5);
        assert!(detector.metrics().snapshot().training_steps >= 1);
    }

    #[test]
    fn test_reset_clears_episodes() {
        let mut detector = heuristic_detector();
        detector.detect_at(&syn_flood(), Utc::now(), false);
        detector.reset();
        assert!(detector.tracker().current().is_none());
        assert!(detector.attack_history(10).is_empty());
    }

    /// Rejects every write
    struct UnavailableSink;

    impl EpisodeSink for UnavailableSink {
        fn persist_alert(&mut self, _alert: &AttackAlert) -> DefenderResult<()> {
            Err(DefenderError::Io(std::io::Error::new(std::io::ErrorKind::Other, "store offline")))
        }

        fn persist_episode(&mut self, _episode: &AttackEpisode) -> DefenderResult<()> {
            Err(DefenderError::Io(std::io::Error::new(std::io::ErrorKind::Other, "store offline")))
        }
    }

    #[test]
    fn test_sink_failures_do_not_stop_detection() {
        let mut detector = heuristic_detector().with_sink(UnavailableSink);
        let start = Utc::now();

        let result = detector.detect_at(&syn_flood(), start, false);
        assert!(result.is_attack);
        assert!(result.attack_in_progress);

        let closed = detector.detect_at(&benign(), start + Duration::seconds(60), false);
        assert!(!closed.attack_in_progress);

        let snapshot = detector.metrics().snapshot();
        assert_eq!(snapshot.persistence_failures, 2);
        assert_eq!(snapshot.windows_processed, 2);
    }

    #[test]
    fn test_non_finite_network_falls_back_to_heuristic() {
        let detector_config = EngineConfig {
            agent: AgentConfig {
                seed: Some(5),
                ..Default::default()
            },
            ..Default::default()
        };
        let mut detector = DdqnDetector::new(detector_config).unwrap();
        {
            let agent = detector.agent();
            let mut agent = agent.lock();
            let saturated = vec![1e308; agent.parameters().len()];
            agent.load_parameters(&saturated).unwrap();
            assert!(agent.predict(&[0.5; 8]).unwrap().1.iter().any(|q| !q.is_finite()));
        }

        let result = detector.detect_at(&syn_flood(), Utc::now(), false);
        assert_eq!(result.backend, BackendKind::Heuristic);
        assert!(result.is_attack);
        assert!(result.q_values.iter().all(|q| q.is_finite()));
        assert_eq!(detector.metrics().snapshot().heuristic_fallbacks, 1);
    }

    #[test]
    fn test_shared_agent_shape_must_match() {
        let agent = DdqnAgent::heuristic(AgentConfig {
            window_size: 3,
            ..Default::default()
        })
        .unwrap();
        let result = DdqnDetector::with_agent(EngineConfig::default(), agent);
        assert!(matches!(result, Err(DefenderError::Config(_))));
    }

    #[test]
    fn test_foreign_state_size_is_rejected() {
        let mut config = EngineConfig::default();
        config.agent.state_size = 10;
        assert!(matches!(DdqnDetector::new(config), Err(DefenderError::Config(_))));
    }

    #[test]
    fn test_weighted_heuristic_detector_flags_syn_flood() {
        let mut config = EngineConfig::default();
        config.agent.feature_weights = Some(crate::config::ONE_R_WEIGHTS.to_vec());
        let mut detector = DdqnDetector::heuristic(config).unwrap();

        let result = detector.detect_at(&syn_flood(), Utc::now(), false);
        assert!(result.is_attack);
        assert_eq!(result.backend, BackendKind::Heuristic);
        assert_eq!(detector.metrics().snapshot().heuristic_fallbacks, 0);
    }

    #[test]
    fn test_result_uses_documented_field_names() {
        let mut detector = heuristic_detector();
        let result = detector.detect_at(&syn_flood(), Utc::now(), false);
        let value = serde_json::to_value(&result).unwrap();

        let current = value["current_attack"].as_object().unwrap();
        assert!(current.contains_key("duration"));
        assert!(!current.contains_key("duration_secs"));
        assert!(current.contains_key("type"));

        let recommended = value["recommended_action"].as_object().unwrap();
        assert!(recommended.contains_key("duration"));
        assert!(!recommended.contains_key("duration_secs"));
    }

    #[test]
    fn test_evaluate_windows() {
        let detector = heuristic_detector();
        let metrics = detector
            .evaluate(&[(syn_flood(), true), (benign(), false)])
            .unwrap();
        assert_eq!(metrics.accuracy, 1.0);
    }
}
