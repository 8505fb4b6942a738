//! Defender Core: DDoS detection with Double DQN
//!
//! Classifies short traffic windows as benign or attack-in-progress, tracks
//! attack episodes over time and recommends a mitigation action.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                          DDQN DETECTOR                                │
//! │                                                                       │
//! │  traffic window ──▶ ┌──────────────┐   8 features                     │
//! │                     │   Feature    │ ─────────────┐                   │
//! │                     │  Extractor   │              │                   │
//! │                     └──────────────┘              ▼                   │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────────────┐       │
//! │  │   Replay     │◀──│  DDQN Agent  │──▶│  Value Approximator  │       │
//! │  │   Buffer     │   │ ε-greedy,    │   │  Trained | Heuristic │       │
//! │  └──────────────┘   │ Double-Q     │   └──────────────────────┘       │
//! │                     └──────┬───────┘                                  │
//! │                            │ action, confidence                       │
//! │                     ┌──────▼───────┐   ┌──────────────────────┐       │
//! │                     │   Episode    │──▶│  Mitigation Policy   │──▶ result
//! │                     │   Tracker    │   │  Monitor/RateLimit/  │       │
//! │                     │ Idle ⇄ Active│   │  Block/Filter        │       │
//! │                     └──────┬───────┘   └──────────────────────┘       │
//! │                            ▼                                          │
//! │                     ┌──────────────┐                                  │
//! │                     │ Episode Sink │  (best effort)                   │
//! │                     └──────────────┘                                  │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```

pub mod agent;
pub mod approximator;
pub mod config;
pub mod dataset;
pub mod detector;
pub mod episode;
pub mod error;
pub mod evaluation;
pub mod features;
pub mod metrics;
pub mod mitigation;
pub mod persistence;
pub mod registry;
pub mod replay;
pub mod reward;
pub mod sink;
pub mod training;
pub mod worker;

pub use agent::{AgentStats, DdqnAgent};
pub use approximator::{Backend, BackendKind, HeuristicApproximator, TrainedApproximator, ValueApproximator};
pub use config::{AgentConfig, DetectorConfig, EngineConfig, FeatureConfig, PolicyConfig, TrackerConfig};
pub use dataset::{Dataset, LabeledEpisode};
pub use detector::{DdqnDetector, DetectionResult};
pub use episode::{AttackEpisode, AttackEpisodeTracker, AttackType, CurrentAttack};
pub use error::{DefenderError, DefenderResult};
pub use evaluation::EvaluationMetrics;
pub use features::{FeatureExtractor, StateVector, TrafficRecord, WindowedState};
pub use metrics::{DetectorMetrics, MetricsSnapshot};
pub use mitigation::{MitigationAction, MitigationPolicy, Recommendation, SeverityLevel};
pub use persistence::LoadOutcome;
pub use registry::DetectorRegistry;
pub use replay::{ReplayBuffer, Transition};
pub use sink::{EpisodeSink, JsonLinesSink, MemorySink};
pub use training::{Trainer, TrainingHistory, TrainingOptions};
pub use worker::{SharedAgent, TrainingHandle, TrainingWorker};
