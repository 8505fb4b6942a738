//! Detector Metrics

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters shared by a detector and its training worker
#[derive(Debug, Default)]
pub struct DetectorMetrics {
    windows_processed: AtomicU64,
    attacks_detected: AtomicU64,
    episodes_opened: AtomicU64,
    episodes_closed: AtomicU64,
    training_steps: AtomicU64,
    training_requests_dropped: AtomicU64,
    transitions_rejected: AtomicU64,
    persistence_failures: AtomicU64,
    heuristic_fallbacks: AtomicU64,
}

/// Point-in-time copy of [`DetectorMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub windows_processed: u64,
    pub attacks_detected: u64,
    pub episodes_opened: u64,
    pub episodes_closed: u64,
    pub training_steps: u64,
    pub training_requests_dropped: u64,
    pub transitions_rejected: u64,
    pub persistence_failures: u64,
    pub heuristic_fallbacks: u64,
}

macro_rules! counter {
    ($($name:ident => $field:ident),* $(,)?) => {
        impl DetectorMetrics {
            $(
                pub fn $name(&self) {
                    self.$field.fetch_add(1, Ordering::Relaxed);
                }
            )*
        }
    };
}

counter! {
    record_window => windows_processed,
    record_attack => attacks_detected,
    record_episode_opened => episodes_opened,
    record_episode_closed => episodes_closed,
    record_training_step => training_steps,
    record_dropped_training => training_requests_dropped,
    record_rejected_transition => transitions_rejected,
    record_persistence_failure => persistence_failures,
    record_heuristic_fallback => heuristic_fallbacks,
}

impl DetectorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            windows_processed: self.windows_processed.load(Ordering::Relaxed),
            attacks_detected: self.attacks_detected.load(Ordering::Relaxed),
            episodes_opened: self.episodes_opened.load(Ordering::Relaxed),
            episodes_closed: self.episodes_closed.load(Ordering::Relaxed),
            training_steps: self.training_steps.load(Ordering::Relaxed),
            training_requests_dropped: self.training_requests_dropped.load(Ordering::Relaxed),
            transitions_rejected: self.transitions_rejected.load(Ordering::Relaxed),
            persistence_failures: self.persistence_failures.load(Ordering::Relaxed),
            heuristic_fallbacks: self.heuristic_fallbacks.load(Ordering::Relaxed),
        }
    }

    /// Export as Prometheus text format
    pub fn prometheus(&self, segment: &str) -> String {
        let s = self.snapshot();
        let counters = [
            ("defender_windows_processed_total", "Traffic windows processed", s.windows_processed),
            ("defender_attacks_detected_total", "Windows classified as attack", s.attacks_detected),
            ("defender_episodes_opened_total", "Attack episodes opened", s.episodes_opened),
            ("defender_episodes_closed_total", "Attack episodes closed", s.episodes_closed),
            ("defender_training_steps_total", "Minibatch training steps", s.training_steps),
            ("defender_training_dropped_total", "Training requests dropped", s.training_requests_dropped),
            ("defender_transitions_rejected_total", "Transitions rejected as non-finite", s.transitions_rejected),
            ("defender_persistence_failures_total", "Sink writes that failed", s.persistence_failures),
            ("defender_heuristic_fallbacks_total", "Decisions served by the heuristic", s.heuristic_fallbacks),
        ];

        let mut output = String::new();
        for (name, help, value) in counters {
            output.push_str(&format!("# HELP {} {}\n", name, help));
            output.push_str(&format!("# TYPE {} counter\n", name));
            output.push_str(&format!("{}{{segment=\"{}\"}} {}\n", name, segment, value));
        }
        output
    }
}
