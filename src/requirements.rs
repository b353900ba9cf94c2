use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Closed set of feedback classifications. Weights and labels are total
/// mappings, so every level always has a score and a display name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackLevel {
    Perfect,
    Good,
    NeedsAdjustment,
    Poor,
}

impl FeedbackLevel {
    pub fn weight(self) -> f32 {
        match self {
            FeedbackLevel::Perfect => 100.0,
            FeedbackLevel::Good => 85.0,
            FeedbackLevel::NeedsAdjustment => 70.0,
            FeedbackLevel::Poor => 50.0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            FeedbackLevel::Perfect => "perfect",
            FeedbackLevel::Good => "good",
            FeedbackLevel::NeedsAdjustment => "needs_adjustment",
            FeedbackLevel::Poor => "poor",
        }
    }
}

/// Per-level coaching text. Any missing entry falls back to generic
/// measured-vs-target wording at analysis time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedbackMessages {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub perfect: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub good: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub needs_adjustment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poor: Option<String>,
}

impl FeedbackMessages {
    pub fn get(&self, level: FeedbackLevel) -> Option<&str> {
        match level {
            FeedbackLevel::Perfect => self.perfect.as_deref(),
            FeedbackLevel::Good => self.good.as_deref(),
            FeedbackLevel::NeedsAdjustment => self.needs_adjustment.as_deref(),
            FeedbackLevel::Poor => self.poor.as_deref(),
        }
    }
}

/// Target band for one named angle of one pose.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AngleRequirement {
    pub name: String,
    pub min_angle: f32,
    pub max_angle: f32,
    pub optimal_angle: f32,
    #[serde(default = "default_tolerance")]
    pub tolerance: f32,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub feedback_messages: FeedbackMessages,
}

fn default_tolerance() -> f32 {
    10.0
}

macro_rules! msgs {
    ($perfect:expr, $good:expr, $adjust:expr, $poor:expr) => {
        FeedbackMessages {
            perfect: Some($perfect.to_string()),
            good: Some($good.to_string()),
            needs_adjustment: Some($adjust.to_string()),
            poor: Some($poor.to_string()),
        }
    };
}

fn req(
    name: &str,
    min: f32,
    max: f32,
    optimal: f32,
    tolerance: f32,
    description: &str,
    messages: FeedbackMessages,
) -> AngleRequirement {
    AngleRequirement {
        name: name.to_string(),
        min_angle: min,
        max_angle: max,
        optimal_angle: optimal,
        tolerance,
        description: description.to_string(),
        feedback_messages: messages,
    }
}

/// Static table of per-pose angle targets, overridable from a JSON file.
pub struct RequirementDatabase {
    pose_requirements: BTreeMap<String, Vec<AngleRequirement>>,
}

impl Default for RequirementDatabase {
    fn default() -> Self {
        Self {
            pose_requirements: builtin_requirements(),
        }
    }
}

impl RequirementDatabase {
    /// Requirements for a pose, empty when the pose is not in the table.
    /// Lookup is case-insensitive on the pose name.
    pub fn requirements(&self, pose_name: &str) -> &[AngleRequirement] {
        self.pose_requirements
            .get(&pose_name.to_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Replace (or add) the requirement list for a pose.
    pub fn insert(&mut self, pose_name: &str, requirements: Vec<AngleRequirement>) {
        self.pose_requirements
            .insert(pose_name.to_lowercase(), requirements);
    }

    pub fn pose_names(&self) -> Vec<&str> {
        self.pose_requirements.keys().map(String::as_str).collect()
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(&self.pose_requirements)?;
        fs::write(path, json)
            .with_context(|| format!("writing requirement table {}", path.display()))?;
        Ok(())
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading requirement table {}", path.display()))?;
        let pose_requirements: BTreeMap<String, Vec<AngleRequirement>> =
            serde_json::from_str(&raw)
                .with_context(|| format!("parsing requirement table {}", path.display()))?;
        info!(poses = pose_requirements.len(), "requirement table loaded");
        Ok(Self { pose_requirements })
    }

    /// File-backed table when available, built-in defaults otherwise.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load_from_file(&path) {
            Ok(db) => db,
            Err(e) => {
                warn!(error = %e, "using built-in angle requirements");
                Self::default()
            }
        }
    }
}

fn builtin_requirements() -> BTreeMap<String, Vec<AngleRequirement>> {
    let mut table = BTreeMap::new();

    table.insert(
        "warrior_2".to_string(),
        vec![
            req(
                "front_knee",
                85.0,
                95.0,
                90.0,
                5.0,
                "Front leg should be bent at 90 degrees",
                msgs!(
                    "Perfect 90-degree front knee! Excellent warrior pose.",
                    "Good knee angle, very close to 90 degrees.",
                    "Bend your front knee more to reach 90 degrees.",
                    "Front knee needs significant adjustment - aim for 90 degrees."
                ),
            ),
            req(
                "back_leg",
                160.0,
                180.0,
                175.0,
                10.0,
                "Back leg should be straight",
                msgs!(
                    "Back leg perfectly straight! Great foundation.",
                    "Back leg looking good, nearly straight.",
                    "Straighten your back leg more.",
                    "Back leg needs to be much straighter."
                ),
            ),
            req(
                "hip_alignment",
                -5.0,
                5.0,
                0.0,
                3.0,
                "Hips should be level",
                msgs!(
                    "Hips perfectly level! Excellent alignment.",
                    "Hip alignment is good.",
                    "Adjust your hips to be more level.",
                    "Focus on leveling your hips."
                ),
            ),
        ],
    );

    table.insert(
        "tree_pose".to_string(),
        vec![
            req(
                "standing_leg",
                170.0,
                180.0,
                175.0,
                5.0,
                "Standing leg should be straight and strong",
                msgs!(
                    "Standing leg perfectly straight! Solid foundation.",
                    "Standing leg looks stable.",
                    "Straighten your standing leg more.",
                    "Focus on keeping your standing leg straight."
                ),
            ),
            req(
                "lifted_leg",
                45.0,
                90.0,
                70.0,
                15.0,
                "Lifted leg should create good angle",
                msgs!(
                    "Perfect leg lift angle! Great tree pose.",
                    "Good leg position.",
                    "Try lifting your leg higher.",
                    "Lift your leg higher for better tree pose."
                ),
            ),
            req(
                "spine_vertical",
                0.0,
                10.0,
                0.0,
                5.0,
                "Spine should be vertical",
                msgs!(
                    "Spine perfectly upright! Excellent posture.",
                    "Good spinal alignment.",
                    "Stand up straighter.",
                    "Focus on keeping your spine vertical."
                ),
            ),
        ],
    );

    table.insert(
        "downward_dog".to_string(),
        vec![
            req(
                "shoulder_angle",
                40.0,
                60.0,
                50.0,
                8.0,
                "Shoulder angle creates inverted V",
                msgs!(
                    "Perfect downward dog angle! Great inverted V.",
                    "Good downward dog position.",
                    "Adjust your shoulder angle slightly.",
                    "Work on creating a better inverted V shape."
                ),
            ),
            req(
                "left_knee",
                160.0,
                180.0,
                175.0,
                10.0,
                "Legs should be straight",
                msgs!(
                    "Legs perfectly straight! Excellent foundation.",
                    "Good leg extension.",
                    "Try to straighten your legs more.",
                    "Focus on straightening both legs."
                ),
            ),
            req(
                "right_knee",
                160.0,
                180.0,
                175.0,
                10.0,
                "Legs should be straight",
                msgs!(
                    "Legs perfectly straight! Excellent foundation.",
                    "Good leg extension.",
                    "Try to straighten your legs more.",
                    "Focus on straightening both legs."
                ),
            ),
        ],
    );

    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_cover_every_level() {
        assert_eq!(FeedbackLevel::Perfect.weight(), 100.0);
        assert_eq!(FeedbackLevel::Good.weight(), 85.0);
        assert_eq!(FeedbackLevel::NeedsAdjustment.weight(), 70.0);
        assert_eq!(FeedbackLevel::Poor.weight(), 50.0);
    }

    #[test]
    fn builtin_poses_present() {
        let db = RequirementDatabase::default();
        assert_eq!(db.requirements("warrior_2").len(), 3);
        assert_eq!(db.requirements("tree_pose").len(), 3);
        assert_eq!(db.requirements("downward_dog").len(), 3);
    }

    #[test]
    fn unrecognized_pose_is_empty_not_error() {
        let db = RequirementDatabase::default();
        assert!(db.requirements("crow_pose").is_empty());
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let db = RequirementDatabase::default();
        assert_eq!(db.requirements("Warrior_2").len(), 3);
    }

    #[test]
    fn insert_replaces_existing() {
        let mut db = RequirementDatabase::default();
        db.insert(
            "warrior_2",
            vec![req(
                "front_knee",
                80.0,
                100.0,
                90.0,
                10.0,
                "",
                FeedbackMessages::default(),
            )],
        );
        assert_eq!(db.requirements("warrior_2").len(), 1);
        assert_eq!(db.requirements("warrior_2")[0].tolerance, 10.0);
    }

    #[test]
    fn json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("critical_angles.json");

        let db = RequirementDatabase::default();
        db.save_to_file(&path).unwrap();

        let reloaded = RequirementDatabase::load_from_file(&path).unwrap();
        let front_knee = &reloaded.requirements("warrior_2")[0];
        assert_eq!(front_knee.name, "front_knee");
        assert_eq!(front_knee.optimal_angle, 90.0);
        assert_eq!(
            front_knee.feedback_messages.get(FeedbackLevel::Perfect),
            Some("Perfect 90-degree front knee! Excellent warrior pose.")
        );
    }

    #[test]
    fn load_or_default_tolerates_missing_file() {
        let db = RequirementDatabase::load_or_default("/nonexistent/angles.json");
        assert!(!db.requirements("tree_pose").is_empty());
    }
}
