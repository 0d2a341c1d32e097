use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::scan_types::{ScanError, SlotKey, SlotMap, SlotVerdict};

/// Older state files wrote keys without seconds
const LEGACY_KEY_FORMAT: &str = "%Y-%m-%d %H:%M";

/// JSON file holding the slot map of the previous run
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    /// Store backed by the file at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the state file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the previous slot map; a missing or corrupt file reads as empty
    pub async fn load(&self) -> Result<SlotMap, ScanError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("No state file at {}, starting fresh", self.path.display());
                return Ok(SlotMap::new());
            }
            Err(e) => return Err(e.into()),
        };

        let entries: BTreeMap<String, Value> = match serde_json::from_str(&raw) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("State file {} is corrupt ({}), ignoring it", self.path.display(), e);
                return Ok(SlotMap::new());
            }
        };

        let mut slots = SlotMap::new();
        for (raw_key, raw_verdict) in entries {
            let Some(key) = parse_state_key(&raw_key) else {
                warn!("Ignoring state entry with bad key {:?}", raw_key);
                continue;
            };
            match serde_json::from_value::<SlotVerdict>(raw_verdict) {
                Ok(verdict) => {
                    slots.insert(key, verdict);
                }
                Err(e) => warn!("Ignoring state entry {:?}: {}", raw_key, e),
            }
        }

        debug!("Loaded {} slots from {}", slots.len(), self.path.display());
        Ok(slots)
    }

    /// Replace the state file with `slots`
    pub async fn save(&self, slots: &SlotMap) -> Result<(), ScanError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let body = serde_json::to_string_pretty(slots)
            .map_err(|e| ScanError::DataFormat(format!("Failed to encode state: {}", e)))?;

        let mut staging = self.path.clone().into_os_string();
        staging.push(".tmp");
        let staging = PathBuf::from(staging);

        tokio::fs::write(&staging, body).await?;
        tokio::fs::rename(&staging, &self.path).await?;

        debug!("Saved {} slots to {}", slots.len(), self.path.display());
        Ok(())
    }
}

fn parse_state_key(raw: &str) -> Option<SlotKey> {
    raw.parse::<SlotKey>().ok().or_else(|| {
        NaiveDateTime::parse_from_str(raw.trim(), LEGACY_KEY_FORMAT)
            .ok()
            .map(|dt| SlotKey::new(dt.date(), dt.time()))
    })
}
