use std::collections::BTreeMap;

use serde::Serialize;

use crate::angles::pose_angles;
use crate::requirements::{AngleRequirement, FeedbackLevel, RequirementDatabase};
use crate::Keypoints;

/// One evaluated angle: measurement vs requirement with coaching text.
/// Created fresh per analysis call; only raw measurements are persisted.
#[derive(Debug, Clone, Serialize)]
pub struct AngleAnalysis {
    pub angle_name: String,
    pub measured_angle: f32,
    pub required_angle: f32,
    pub deviation: f32,
    pub feedback_level: FeedbackLevel,
    pub message: String,
    pub improvement_tip: String,
}

/// Scores measured angles against the requirement database for a pose.
pub struct PostureAnalyzer {
    requirements: RequirementDatabase,
}

impl PostureAnalyzer {
    pub fn new(requirements: RequirementDatabase) -> Self {
        Self { requirements }
    }

    pub fn requirements(&self) -> &RequirementDatabase {
        &self.requirements
    }

    pub fn analyze_pose(&self, pose_name: &str, keypoints: &Keypoints) -> Vec<AngleAnalysis> {
        let current_angles = pose_angles(keypoints);
        self.requirements
            .requirements(pose_name)
            .iter()
            .filter_map(|requirement| {
                let measured = resolve_measurement(&requirement.name, &current_angles)?;
                if measured < 0.0 {
                    return None;
                }
                Some(analyze_single_angle(requirement, measured))
            })
            .collect()
    }

    /// Average of the per-angle level weights, with a coarse grade label.
    /// No analyses means no score, not a zero grade on thin air.
    pub fn overall_score(&self, analyses: &[AngleAnalysis]) -> (f32, &'static str) {
        if analyses.is_empty() {
            return (0.0, "No data");
        }

        let total: f32 = analyses.iter().map(|a| a.feedback_level.weight()).sum();
        let average = total / analyses.len() as f32;

        let grade = if average >= 95.0 {
            "Excellent!"
        } else if average >= 85.0 {
            "Very Good"
        } else if average >= 75.0 {
            "Good"
        } else if average >= 65.0 {
            "Fair"
        } else {
            "Needs Work"
        };

        (average, grade)
    }
}

/// Resolve a requirement name to a measured value, applying the fixed alias
/// table for pose-specific requirement names that have no direct angle.
fn resolve_measurement(angle_name: &str, angles: &BTreeMap<String, f32>) -> Option<f32> {
    if let Some(v) = angles.get(angle_name) {
        return Some(*v);
    }

    match angle_name {
        // Warrior 2: left knee is assumed front, right leg back.
        "front_knee" => angles.get("left_knee").copied(),
        "back_leg" => angles.get("right_knee").copied(),
        // Tree pose: right leg standing, left hip angle tracks the lift.
        "standing_leg" => angles.get("right_knee").copied(),
        "lifted_leg" => angles.get("left_hip").copied(),
        // Downward dog: both arm-torso angles must be measured.
        "shoulder_angle" => {
            let left = angles.get("left_arm_torso").copied().unwrap_or(0.0);
            let right = angles.get("right_arm_torso").copied().unwrap_or(0.0);
            if left > 0.0 && right > 0.0 {
                Some((left + right) / 2.0)
            } else {
                None
            }
        }
        // Level hips read as 0; an absent hip line is treated as level.
        "hip_alignment" => Some(angles.get("hip_line").copied().unwrap_or(0.0).abs()),
        _ => None,
    }
}

fn analyze_single_angle(requirement: &AngleRequirement, measured: f32) -> AngleAnalysis {
    let deviation = (measured - requirement.optimal_angle).abs();

    let feedback_level = if deviation <= requirement.tolerance / 2.0 {
        FeedbackLevel::Perfect
    } else if deviation <= requirement.tolerance {
        FeedbackLevel::Good
    } else if requirement.min_angle <= measured && measured <= requirement.max_angle {
        FeedbackLevel::NeedsAdjustment
    } else {
        FeedbackLevel::Poor
    };

    let message = requirement
        .feedback_messages
        .get(feedback_level)
        .map(str::to_string)
        .unwrap_or_else(|| {
            format!(
                "Angle is {measured:.1}°, target is {:.1}°",
                requirement.optimal_angle
            )
        });

    let improvement_tip = if measured < requirement.optimal_angle {
        format!(
            "Increase angle by {:.1}°",
            requirement.optimal_angle - measured
        )
    } else if measured > requirement.optimal_angle {
        format!(
            "Decrease angle by {:.1}°",
            measured - requirement.optimal_angle
        )
    } else {
        "Perfect! Maintain this position.".to_string()
    };

    AngleAnalysis {
        angle_name: requirement.name.clone(),
        measured_angle: measured,
        required_angle: requirement.optimal_angle,
        deviation,
        feedback_level,
        message,
        improvement_tip,
    }
}
