//! Feature Extraction
//!
//! Turns one observation window of packet records into a fixed,
//! [0,1]-normalised state vector.

use crate::config::{FeatureConfig, STATE_SIZE};
use crate::{DefenderError, DefenderResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use tracing::warn;

/// One packet-like record as delivered by the capture collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficRecord {
    pub source_ip: String,
    pub destination_ip: String,
    pub protocol: String,
    #[serde(default)]
    pub tcp_flags: Option<String>,
    #[serde(default)]
    pub packet_size: u64,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl TrafficRecord {
    pub fn new(
        source_ip: impl Into<String>,
        destination_ip: impl Into<String>,
        protocol: impl Into<String>,
        packet_size: u64,
    ) -> Self {
        Self {
            source_ip: source_ip.into(),
            destination_ip: destination_ip.into(),
            protocol: protocol.into(),
            tcp_flags: None,
            packet_size,
            timestamp: None,
        }
    }

    pub fn with_flags(mut self, flags: impl Into<String>) -> Self {
        self.tcp_flags = Some(flags.into());
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Whether the TCP flag field carries SYN and nothing else
    pub fn is_syn_only(&self) -> bool {
        self.tcp_flags.as_deref().map(is_syn_only).unwrap_or(false)
    }
}

/// `S`/`SYN` mnemonics, or the numeric flag byte 0x02
fn is_syn_only(flags: &str) -> bool {
    let flags: String = flags.chars().filter(|c| !c.is_whitespace()).collect();
    if let Some(hex) = flags.strip_prefix("0x").or_else(|| flags.strip_prefix("0X")) {
        return u8::from_str_radix(hex, 16).map(|v| v == 0x02).unwrap_or(false);
    }
    if !flags.is_empty() && flags.chars().all(|c| c.is_ascii_digit()) {
        return flags.parse::<u16>().map(|v| v == 2).unwrap_or(false);
    }
    matches!(flags.to_ascii_uppercase().as_str(), "S" | "SYN")
}

// =============================================================================
// State vector
// =============================================================================

/// Features in state-vector order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    SourceEntropy,
    DestinationEntropy,
    SynRatio,
    TrafficVolume,
    PacketRate,
    UniqueSrcCount,
    UniqueDstCount,
    ProtocolImbalance,
}

impl Feature {
    pub const ALL: [Feature; STATE_SIZE] = [
        Self::SourceEntropy,
        Self::DestinationEntropy,
        Self::SynRatio,
        Self::TrafficVolume,
        Self::PacketRate,
        Self::UniqueSrcCount,
        Self::UniqueDstCount,
        Self::ProtocolImbalance,
    ];

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SourceEntropy => "source_entropy",
            Self::DestinationEntropy => "destination_entropy",
            Self::SynRatio => "syn_ratio",
            Self::TrafficVolume => "traffic_volume",
            Self::PacketRate => "packet_rate",
            Self::UniqueSrcCount => "unique_src_count",
            Self::UniqueDstCount => "unique_dst_count",
            Self::ProtocolImbalance => "protocol_imbalance",
        }
    }
}

/// Immutable, [0,1]-clamped feature vector of one traffic window
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StateVector {
    pub source_entropy: f64,
    pub destination_entropy: f64,
    pub syn_ratio: f64,
    pub traffic_volume: f64,
    pub packet_rate: f64,
    pub unique_src_count: f64,
    pub unique_dst_count: f64,
    pub protocol_imbalance: f64,
}

impl StateVector {
    /// The all-zero vector produced for empty or malformed windows
    pub fn zero() -> Self {
        Self::default()
    }

    /// Build from raw values; non-finite entries become 0, the rest are clamped to [0,1]
    pub fn from_array(values: [f64; STATE_SIZE]) -> Self {
        let v = values.map(clamp_unit);
        Self {
            source_entropy: v[0],
            destination_entropy: v[1],
            syn_ratio: v[2],
            traffic_volume: v[3],
            packet_rate: v[4],
            unique_src_count: v[5],
            unique_dst_count: v[6],
            protocol_imbalance: v[7],
        }
    }

    /// Build from a slice holding exactly `STATE_SIZE` values
    pub fn from_slice(values: &[f64]) -> DefenderResult<Self> {
        let array: [f64; STATE_SIZE] = values.try_into().map_err(|_| {
            DefenderError::Input(format!(
                "state vector needs {} values, got {}",
                STATE_SIZE,
                values.len()
            ))
        })?;
        Ok(Self::from_array(array))
    }

    pub fn to_array(&self) -> [f64; STATE_SIZE] {
        [
            self.source_entropy,
            self.destination_entropy,
            self.syn_ratio,
            self.traffic_volume,
            self.packet_rate,
            self.unique_src_count,
            self.unique_dst_count,
            self.protocol_imbalance,
        ]
    }

    pub fn get(&self, feature: Feature) -> f64 {
        self.to_array()[feature.index()]
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Concatenation of `window_size` consecutive state vectors, oldest first
#[derive(Debug, Clone, PartialEq)]
pub struct WindowedState {
    windows: Vec<StateVector>,
}

impl WindowedState {
    /// Take the last `window_size` vectors, front-padding with the earliest one
    pub fn from_history(history: &[StateVector], window_size: usize) -> Self {
        let window_size = window_size.max(1);
        let start = history.len().saturating_sub(window_size);
        let mut windows: Vec<StateVector> = history[start..].to_vec();
        let pad = windows.first().copied().unwrap_or_default();
        while windows.len() < window_size {
            windows.insert(0, pad);
        }
        Self { windows }
    }

    pub fn latest(&self) -> StateVector {
        self.windows.last().copied().unwrap_or_default()
    }

    pub fn window_size(&self) -> usize {
        self.windows.len()
    }

    /// Flatten into the approximator input
    pub fn to_vec(&self) -> Vec<f64> {
        self.windows.iter().flat_map(|w| w.to_array()).collect()
    }
}

// =============================================================================
// Entropy
// =============================================================================

/// Shannon entropy of a multiset, normalised by `log2(distinct)`
///
/// Returns 0 for empty input or a single distinct value, 1 for a uniform
/// distribution.
pub fn normalized_entropy<T, I>(values: I) -> f64
where
    T: Hash + Eq,
    I: IntoIterator<Item = T>,
{
    let mut counts: HashMap<T, u64> = HashMap::new();
    let mut total = 0u64;
    for value in values {
        *counts.entry(value).or_default() += 1;
        total += 1;
    }

    if counts.len() <= 1 {
        return 0.0;
    }

    let n = total as f64;
    let entropy: f64 = counts
        .values()
        .map(|&count| {
            let p = count as f64 / n;
            -p * p.log2()
        })
        .sum();

    clamp_unit(entropy / (counts.len() as f64).log2())
}

// =============================================================================
// Extractor
// =============================================================================

/// Pure function from a traffic window to a state vector
#[derive(Debug, Clone, Default)]
pub struct FeatureExtractor {
    config: FeatureConfig,
}

impl FeatureExtractor {
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Extract features; empty windows give the zero vector, malformed ones an `Input` error
    pub fn extract(&self, records: &[TrafficRecord]) -> DefenderResult<StateVector> {
        if records.is_empty() {
            return Ok(StateVector::zero());
        }
        if let Some(bad) = records
            .iter()
            .position(|r| r.source_ip.trim().is_empty() || r.destination_ip.trim().is_empty())
        {
            return Err(DefenderError::Input(format!(
                "record {} has no source or destination address",
                bad
            )));
        }

        let total_packets = records.len() as f64;
        let syn_count = records.iter().filter(|r| r.is_syn_only()).count() as f64;
        let total_bytes = records.iter().fold(0u64, |acc, r| acc.saturating_add(r.packet_size));

        let unique_src: HashSet<&str> = records.iter().map(|r| r.source_ip.as_str()).collect();
        let unique_dst: HashSet<&str> = records.iter().map(|r| r.destination_ip.as_str()).collect();

        let duration = self.window_duration(records);
        let rate = total_packets / duration;

        Ok(StateVector::from_array([
            normalized_entropy(records.iter().map(|r| r.source_ip.as_str())),
            normalized_entropy(records.iter().map(|r| r.destination_ip.as_str())),
            syn_count / total_packets,
            ((total_bytes as f64) + 1.0).ln() / self.config.volume_log_scale,
            rate / self.config.packet_rate_ceiling,
            unique_src.len() as f64 / self.config.unique_src_ceiling,
            unique_dst.len() as f64 / self.config.unique_dst_ceiling,
            normalized_entropy(records.iter().map(|r| r.protocol.trim().to_ascii_uppercase())),
        ]))
    }

    /// Extract features, logging and substituting the zero vector on bad input
    pub fn extract_or_zero(&self, records: &[TrafficRecord]) -> StateVector {
        self.extract(records).unwrap_or_else(|e| {
            warn!("Feature extraction failed, using zero vector: {}", e);
            StateVector::zero()
        })
    }

    /// Span of the record timestamps in seconds, or the configured default
    fn window_duration(&self, records: &[TrafficRecord]) -> f64 {
        let mut stamps = records.iter().filter_map(|r| r.timestamp);
        let Some(first) = stamps.next() else {
            return self.config.default_window_secs;
        };
        let (min, max) = stamps.fold((first, first), |(lo, hi), t| (lo.min(t), hi.max(t)));
        let span = (max - min).num_milliseconds() as f64 / 1000.0;
        if span > 0.0 {
            span
        } else {
            self.config.default_window_secs
        }
    }
}
