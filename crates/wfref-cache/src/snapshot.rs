//! Persisted cache contents
//!
//! A snapshot is a flat, order-irrelevant list of records. Every field has a
//! serde default so any well-formed JSON object deserializes; maps are always
//! written, never omitted.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use wfref_foundation::{CoreError, CoreResult, ParameterMap};

pub const SNAPSHOT_VERSION: u32 = 1;

fn current_version() -> u32 {
    SNAPSHOT_VERSION
}

/// Point-in-time copy of the cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSnapshot {
    #[serde(default = "current_version")]
    pub version: u32,
    /// Epoch milliseconds
    #[serde(default)]
    pub saved_at: i64,
    #[serde(default)]
    pub records: Vec<SnapshotRecord>,
}

impl Default for CacheSnapshot {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at: 0,
            records: Vec::new(),
        }
    }
}

impl CacheSnapshot {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn to_json(&self) -> CoreResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> CoreResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| CoreError::snapshot(format!("Failed to parse snapshot: {}", e)))
    }
}

/// One persisted record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRecord {
    /// Normalized identity key
    pub identity: String,
    #[serde(default)]
    pub inputs: ParameterMap,
    #[serde(default)]
    pub outputs: ParameterMap,
    /// Epoch milliseconds, 0 when the record has no expiry
    #[serde(default)]
    pub expires_at: i64,
    #[serde(default)]
    pub resolved: bool,
    #[serde(default)]
    pub suppressed: bool,
    #[serde(default)]
    pub ignored_inputs: BTreeSet<String>,
    #[serde(default)]
    pub ignored_outputs: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_version: Option<String>,
}

pub(crate) fn to_millis(instant: Option<DateTime<Utc>>) -> i64 {
    instant.map_or(0, |t| t.timestamp_millis())
}

pub(crate) fn from_millis(millis: i64) -> Option<DateTime<Utc>> {
    if millis <= 0 {
        return None;
    }
    Utc.timestamp_millis_opt(millis).single()
}

/// Reads and writes a snapshot file
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the snapshot; a missing file is an empty snapshot
    pub fn load(&self) -> CoreResult<CacheSnapshot> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No snapshot on disk");
                return Ok(CacheSnapshot::default());
            }
            Err(e) => return Err(e.into()),
        };

        let snapshot = CacheSnapshot::from_json(&content)?;
        if snapshot.version > SNAPSHOT_VERSION {
            return Err(CoreError::snapshot(format!(
                "Unsupported snapshot version {} (max: {})",
                snapshot.version, SNAPSHOT_VERSION
            )));
        }

        info!(
            path = %self.path.display(),
            records = snapshot.len(),
            "Loaded cache snapshot"
        );
        Ok(snapshot)
    }

    /// Write the snapshot through a temporary sibling file so a crash never
    /// leaves a truncated snapshot behind
    pub fn save(&self, snapshot: &CacheSnapshot) -> CoreResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = snapshot.to_json()?;
        let mut temp_name = self.path.as_os_str().to_owned();
        temp_name.push(".tmp");
        let temp_path = PathBuf::from(temp_name);

        std::fs::write(&temp_path, json)?;
        std::fs::rename(&temp_path, &self.path)?;

        info!(
            path = %self.path.display(),
            records = snapshot.len(),
            "Saved cache snapshot"
        );
        Ok(())
    }
}
