//! Per-segment detectors
//!
//! Every traffic segment gets its own detector, and so its own agent, replay
//! buffer and episode tracker. Nothing learnable is shared between segments.

use crate::config::EngineConfig;
use crate::detector::DdqnDetector;
use crate::DefenderResult;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

pub type SharedDetector = Arc<Mutex<DdqnDetector>>;

pub struct DetectorRegistry {
    config: EngineConfig,
    model_path: Option<PathBuf>,
    heuristic: bool,
    detectors: DashMap<String, SharedDetector>,
}

impl DetectorRegistry {
    pub fn new(config: EngineConfig) -> DefenderResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            model_path: None,
            heuristic: false,
            detectors: DashMap::new(),
        })
    }

    /// Seed every new detector from a persisted model
    pub fn with_model(mut self, path: impl Into<PathBuf>) -> Self {
        self.model_path = Some(path.into());
        self
    }

    /// Create heuristic-only detectors
    pub fn with_heuristic(mut self) -> Self {
        self.heuristic = true;
        self
    }

    /// Detector for `segment`, created on first use
    pub fn get_or_create(&self, segment: &str) -> DefenderResult<SharedDetector> {
        if let Some(detector) = self.detectors.get(segment) {
            return Ok(detector.clone());
        }
        match self.detectors.entry(segment.to_string()) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let detector = Arc::new(Mutex::new(self.build()?));
                info!("Created detector for segment {}", segment);
                Ok(entry.insert(detector).clone())
            }
        }
    }

    fn build(&self) -> DefenderResult<DdqnDetector> {
        if self.heuristic {
            return DdqnDetector::heuristic(self.config.clone());
        }
        let mut detector = DdqnDetector::new(self.config.clone())?;
        if let Some(path) = &self.model_path {
            detector.load_model(path)?;
        }
        Ok(detector)
    }

    pub fn get(&self, segment: &str) -> Option<SharedDetector> {
        self.detectors.get(segment).map(|d| d.clone())
    }

    pub fn remove(&self, segment: &str) -> Option<SharedDetector> {
        self.detectors.remove(segment).map(|(_, d)| d)
    }

    pub fn segments(&self) -> Vec<String> {
        let mut segments: Vec<String> = self.detectors.iter().map(|e| e.key().clone()).collect();
        segments.sort();
        segments
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }

    /// Prometheus text for every segment
    pub fn prometheus(&self) -> String {
        self.segments()
            .iter()
            .filter_map(|segment| {
                self.get(segment)
                    .map(|detector| detector.lock().metrics().prometheus(segment))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::TrafficRecord;
    use chrono::Utc;

    fn flood() -> Vec<TrafficRecord> {
        (0..100)
            .map(|i| TrafficRecord::new(format!("10.1.0.{}", i % 80), "192.168.1.10", "TCP", 60).with_flags("S"))
            .collect()
    }

    #[test]
    fn test_segments_are_isolated() {
        let registry = DetectorRegistry::new(EngineConfig::default()).unwrap().with_heuristic();
        let a = registry.get_or_create("edge-a").unwrap();
        let b = registry.get_or_create("edge-b").unwrap();
        assert!(Arc::ptr_eq(&a, &registry.get_or_create("edge-a").unwrap()));

        a.lock().detect_at(&flood(), Utc::now(), false);
        assert!(a.lock().tracker().current().is_some());
        assert!(b.lock().tracker().current().is_none());
        assert_eq!(registry.segments(), vec!["edge-a".to_string(), "edge-b".to_string()]);
    }

    #[test]
    fn test_remove_and_export() {
        let registry = DetectorRegistry::new(EngineConfig::default()).unwrap().with_heuristic();
        registry.get_or_create("core").unwrap().lock().detect_at(&flood(), Utc::now(), false);
        assert!(registry.prometheus().contains("defender_windows_processed_total{segment=\"core\"} 1"));

        assert!(registry.remove("core").is_some());
        assert!(registry.is_empty());
    }
}
