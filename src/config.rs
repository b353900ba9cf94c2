use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub pose_detection: PoseDetectionConfig,
    pub narrator: NarratorConfig,
    pub performance: PerformanceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoseDetectionConfig {
    pub similarity_threshold: f32,
    pub confidence_threshold: f32,
    /// Seconds a pose must be held before feedback is considered.
    pub min_hold_time: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NarratorConfig {
    pub enabled: bool,
    /// Seconds between feedback utterances for the same pose.
    pub feedback_cooldown: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    pub history_days: i64,
    /// Degrees above the historical average that count as an improvement.
    pub improvement_threshold: f32,
    /// Allow-list of angles to track, per pose. Unlisted pairs are ignored.
    pub tracked_angles: BTreeMap<String, Vec<String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pose_detection: PoseDetectionConfig::default(),
            narrator: NarratorConfig::default(),
            performance: PerformanceConfig::default(),
        }
    }
}

impl Default for PoseDetectionConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.20,
            confidence_threshold: 0.85,
            min_hold_time: 3.0,
        }
    }
}

impl Default for NarratorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            feedback_cooldown: 10.0,
        }
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        let mut tracked_angles = BTreeMap::new();
        tracked_angles.insert(
            "tree_pose".to_string(),
            vec!["standing_leg".into(), "lifted_leg".into(), "spine_vertical".into()],
        );
        tracked_angles.insert(
            "warrior_2".to_string(),
            vec!["front_knee".into(), "back_leg".into(), "hip_alignment".into()],
        );
        tracked_angles.insert(
            "downward_dog".to_string(),
            vec!["shoulder_angle".into(), "hip_angle".into(), "leg_extension".into()],
        );
        Self {
            history_days: 30,
            improvement_threshold: 2.0,
            tracked_angles,
        }
    }
}

impl PerformanceConfig {
    pub fn is_tracked(&self, pose: &str, angle_name: &str) -> bool {
        self.tracked_angles
            .get(pose)
            .is_some_and(|angles| angles.iter().any(|a| a == angle_name))
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))
    }

    /// Missing or malformed config never blocks startup; fall back to the
    /// documented defaults with a warning.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "config unavailable, using defaults");
                Self::default()
            }
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)?;
        fs::write(path, content)
            .with_context(|| format!("writing config {}", path.display()))?;
        Ok(())
    }
}
