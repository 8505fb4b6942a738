//! Detect command
//!
//! Each input line is one traffic window:
//!
//! ```json
//! {"segment": "edge-1", "timestamp": "2024-01-01T00:00:00Z", "label": true, "records": [...]}
//! ```
//!
//! Only `records` is required. Labeled windows are rewarded against their
//! label when learning.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use defender_core::{DetectionResult, DetectorRegistry, EngineConfig, TrafficRecord};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct WindowLine {
    #[serde(default)]
    segment: Option<String>,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    label: Option<bool>,
    records: Vec<TrafficRecord>,
}

#[derive(Debug, Serialize)]
struct SegmentResult<'a> {
    segment: &'a str,
    #[serde(flatten)]
    result: &'a DetectionResult,
}

pub fn handle(
    config: EngineConfig,
    input: &Path,
    model: Option<PathBuf>,
    learn: bool,
    default_segment: &str,
    heuristic: bool,
) -> Result<()> {
    let mut registry = DetectorRegistry::new(config)?;
    if heuristic {
        registry = registry.with_heuristic();
    } else if let Some(model) = model {
        registry = registry.with_model(model);
    }

    let file = std::fs::File::open(input).with_context(|| format!("cannot open {}", input.display()))?;
    let mut windows = 0usize;
    let mut skipped = 0usize;

    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let window: WindowLine = match serde_json::from_str(&line) {
            Ok(window) => window,
            Err(e) => {
                warn!("Skipping line {}: {}", number + 1, e);
                skipped += 1;
                continue;
            }
        };

        let segment = window.segment.as_deref().unwrap_or(default_segment);
        let detector = registry.get_or_create(segment)?;
        let now = window.timestamp.unwrap_or_else(Utc::now);
        let result = {
            let mut detector = detector.lock();
            match window.label {
                Some(label) if learn => detector.detect_labeled(&window.records, now, label),
                _ => detector.detect_at(&window.records, now, learn),
            }
        };

        println!("{}", serde_json::to_string(&SegmentResult { segment, result: &result })?);
        windows += 1;
    }

    info!(
        "Processed {} windows across {} segments ({} skipped)",
        windows,
        registry.len(),
        skipped
    );
    eprint!("{}", registry.prometheus());
    Ok(())
}
