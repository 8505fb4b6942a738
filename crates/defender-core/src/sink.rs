//! Durable storage of alerts and closed episodes
//!
//! Sinks are best effort: the detector logs and counts their failures and
//! keeps detecting.

use crate::episode::{AttackEpisode, AttackType};
use crate::mitigation::Recommendation;
use crate::DefenderResult;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Raised when an attack episode opens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackAlert {
    pub id: Uuid,
    pub episode_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub attack_type: AttackType,
    pub confidence: f64,
    pub severity: f64,
    pub recommendation: Recommendation,
}

pub trait EpisodeSink: Send {
    fn persist_alert(&mut self, alert: &AttackAlert) -> DefenderResult<()>;

    fn persist_episode(&mut self, episode: &AttackEpisode) -> DefenderResult<()>;
}

/// In-memory sink; clones share the same storage
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    alerts: Arc<Mutex<Vec<AttackAlert>>>,
    episodes: Arc<Mutex<Vec<AttackEpisode>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<AttackAlert> {
        self.alerts.lock().clone()
    }

    pub fn episodes(&self) -> Vec<AttackEpisode> {
        self.episodes.lock().clone()
    }
}

impl EpisodeSink for MemorySink {
    fn persist_alert(&mut self, alert: &AttackAlert) -> DefenderResult<()> {
        self.alerts.lock().push(alert.clone());
        Ok(())
    }

    fn persist_episode(&mut self, episode: &AttackEpisode) -> DefenderResult<()> {
        self.episodes.lock().push(episode.clone());
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Record<'a> {
    Alert(&'a AttackAlert),
    Episode(&'a AttackEpisode),
}

/// Appends one JSON object per line
pub struct JsonLinesSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonLinesSink {
    pub fn open(path: impl AsRef<Path>) -> DefenderResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&mut self, record: Record<'_>) -> DefenderResult<()> {
        serde_json::to_writer(&mut self.writer, &record)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

impl EpisodeSink for JsonLinesSink {
    fn persist_alert(&mut self, alert: &AttackAlert) -> DefenderResult<()> {
        self.append(Record::Alert(alert))
    }

    fn persist_episode(&mut self, episode: &AttackEpisode) -> DefenderResult<()> {
        self.append(Record::Episode(episode))
    }
}
