use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// One persisted angle measurement. Append-only: records are never updated
/// or deleted; every derived statistic is recomputed from this log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AngleMeasurement {
    pub pose: String,
    pub angle_name: String,
    pub value: f32,
    pub timestamp: DateTime<Local>,
    pub session_id: String,
}

/// Best value seen for one (pose, angle) key on one day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyBestEntry {
    pub value: f32,
    pub timestamp: DateTime<Local>,
}

/// All-time best value for one (pose, angle) key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonalBestEntry {
    pub value: f32,
    pub date: String,
    pub session_id: String,
}

/// ISO date string -> "{pose}_{angle}" -> best entry.
pub type DailyStats = BTreeMap<String, BTreeMap<String, DailyBestEntry>>;
/// "{pose}_{angle}" -> all-time best entry.
pub type PersonalBests = BTreeMap<String, PersonalBestEntry>;

const HISTORY_FILE: &str = "performance_history.json";
const DAILY_STATS_FILE: &str = "daily_stats.json";
const PERSONAL_BESTS_FILE: &str = "personal_bests.json";

/// Durable storage for the three tracker records. Each record is an
/// independent JSON file; a failure loading one never takes down the others
/// or the session.
pub struct DataStore {
    data_dir: PathBuf,
}

impl DataStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("creating data directory {}", data_dir.display()))?;
        Ok(Self { data_dir })
    }

    pub fn load_history(&self) -> Vec<AngleMeasurement> {
        self.load_or_default(HISTORY_FILE)
    }

    pub fn load_daily_stats(&self) -> DailyStats {
        self.load_or_default(DAILY_STATS_FILE)
    }

    pub fn load_personal_bests(&self) -> PersonalBests {
        self.load_or_default(PERSONAL_BESTS_FILE)
    }

    /// Write all three records. Partial failures are reported through the
    /// error but do not stop the remaining files from being written.
    pub fn save_all(
        &self,
        history: &[AngleMeasurement],
        daily_stats: &DailyStats,
        personal_bests: &PersonalBests,
    ) -> Result<()> {
        let mut first_error = None;
        for result in [
            self.save_json(HISTORY_FILE, &history),
            self.save_json(DAILY_STATS_FILE, daily_stats),
            self.save_json(PERSONAL_BESTS_FILE, personal_bests),
        ] {
            if let Err(e) = result {
                warn!(error = %e, "failed to save performance record");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    fn path(&self, file: &str) -> PathBuf {
        self.data_dir.join(file)
    }

    fn load_or_default<T: DeserializeOwned + Default>(&self, file: &str) -> T {
        let path = self.path(file);
        if !path.exists() {
            return T::default();
        }
        match read_json(&path) {
            Ok(value) => value,
            Err(e) => {
                warn!(file = %path.display(), error = %e,
                      "unreadable performance record, starting empty");
                T::default()
            }
        }
    }

    fn save_json<T: Serialize>(&self, file: &str, value: &T) -> Result<()> {
        let path = self.path(file);
        let json = serde_json::to_string_pretty(value)?;
        fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}
