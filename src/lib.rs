//! Yoga coaching engine: matches detected body keypoints against a reference
//! pose library, scores joint angles against per-pose requirements, tracks
//! performance history, and narrates achievements through a background
//! speech queue.
//!
//! The frame pipeline is single-threaded: match, analyze, gate. Only speech
//! output runs on its own worker thread.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::info;

pub mod analyzer;
pub mod angles;
pub mod config;
pub mod matcher;
pub mod narrator;
pub mod requirements;
pub mod store;
pub mod tracker;

pub use analyzer::{AngleAnalysis, PostureAnalyzer};
pub use config::Config;
pub use matcher::{PoseDatabase, PoseMatch};
pub use narrator::{Narrator, NullSink, SpeechQueue, SpeechSink};
pub use requirements::{FeedbackLevel, RequirementDatabase};
pub use tracker::{PerformanceTracker, SessionSummary};

use store::DataStore;

/// One detected joint position in normalized image space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Joint name to position. An absent key means the detector did not see
/// that joint; the engine only ever reads this map.
pub type Keypoints = HashMap<String, Keypoint>;

/// Everything the engine concluded about one frame.
#[derive(Debug, Clone, Serialize)]
pub struct FrameReport {
    pub pose: String,
    pub score: f32,
    pub confidence: f32,
    pub analyses: Vec<AngleAnalysis>,
    pub overall_score: f32,
    pub grade: String,
    pub feedback_given: bool,
}

/// Top-level session object wiring the matcher, analyzer, tracker and
/// narrator together.
pub struct CoachEngine {
    pose_db: PoseDatabase,
    analyzer: PostureAnalyzer,
    tracker: PerformanceTracker,
    narrator: Narrator,
    speech: SpeechQueue,
}

impl CoachEngine {
    pub fn new(
        config: Config,
        pose_db: PoseDatabase,
        requirements: RequirementDatabase,
        data_dir: impl AsRef<Path>,
        sink: impl SpeechSink,
    ) -> Result<Self> {
        let store = DataStore::new(data_dir.as_ref())?;
        let tracker = PerformanceTracker::new(config.performance.clone(), store);
        let narrator = Narrator::new(&config.narrator, &config.pose_detection);
        let speech = SpeechQueue::start(sink);
        info!(
            poses = pose_db.variation_count(),
            session = tracker.session_id(),
            "coach engine ready"
        );
        Ok(Self {
            pose_db,
            analyzer: PostureAnalyzer::new(requirements),
            tracker,
            narrator,
            speech,
        })
    }

    /// Convenience constructor: library and requirement files are optional,
    /// missing ones degrade to an empty library and the builtin requirement
    /// tables.
    pub fn open(
        config: Config,
        pose_library: impl AsRef<Path>,
        requirements_path: impl AsRef<Path>,
        data_dir: impl AsRef<Path>,
        sink: impl SpeechSink,
    ) -> Result<Self> {
        let pose_db = PoseDatabase::load_or_empty(
            pose_library,
            config.pose_detection.similarity_threshold,
        );
        let requirements = RequirementDatabase::load_or_default(requirements_path);
        Self::new(config, pose_db, requirements, data_dir, sink)
    }

    /// Run one frame through the pipeline: match, analyze, gate.
    pub fn process_frame(&mut self, keypoints: &Keypoints) -> FrameReport {
        let matched = self.pose_db.find_best_match(keypoints);

        let analyses = if matched.name == "unknown" {
            Vec::new()
        } else {
            self.analyzer.analyze_pose(&matched.name, keypoints)
        };
        let (overall_score, grade) = self.analyzer.overall_score(&analyses);

        let feedback_given = self.narrator.observe(
            &matched.name,
            matched.score,
            &analyses,
            &mut self.tracker,
            &self.speech,
        );

        let confidence = if matched.score.is_finite() {
            (1.0 - matched.score).clamp(0.0, 1.0)
        } else {
            0.0
        };

        FrameReport {
            pose: matched.name,
            score: matched.score,
            confidence,
            analyses,
            overall_score,
            grade: grade.to_string(),
            feedback_given,
        }
    }

    pub fn pose_database(&self) -> &PoseDatabase {
        &self.pose_db
    }

    pub fn tracker(&self) -> &PerformanceTracker {
        &self.tracker
    }

    /// Persist performance data, speak the session summary, and stop the
    /// speech worker. Persistence happens before the worker teardown so a
    /// slow sink can never cost recorded data.
    pub fn finish_session(mut self) -> SessionSummary {
        self.tracker.save();
        self.narrator
            .announce_session_summary(&self.tracker, &self.speech);
        let summary = self.tracker.session_summary();
        self.speech.shutdown(Duration::from_secs(10));
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::ReferenceVariation;
    use std::collections::BTreeMap;

    fn full_body() -> Keypoints {
        let joints = [
            ("left_shoulder", 0.45, 0.30),
            ("right_shoulder", 0.55, 0.30),
            ("left_elbow", 0.35, 0.35),
            ("right_elbow", 0.65, 0.35),
            ("left_wrist", 0.25, 0.40),
            ("right_wrist", 0.75, 0.40),
            ("left_hip", 0.46, 0.55),
            ("right_hip", 0.54, 0.55),
            ("left_knee", 0.44, 0.75),
            ("right_knee", 0.56, 0.75),
            ("left_ankle", 0.43, 0.95),
            ("right_ankle", 0.57, 0.95),
        ];
        joints
            .iter()
            .map(|(name, x, y)| (name.to_string(), Keypoint::new(*x, *y)))
            .collect()
    }

    fn engine_with_library(
        raw: BTreeMap<String, Vec<ReferenceVariation>>,
    ) -> (CoachEngine, tempfile::TempDir) {
        let config = Config::default();
        let pose_db = PoseDatabase::from_raw(raw, config.pose_detection.similarity_threshold);
        let dir = tempfile::tempdir().unwrap();
        let engine = CoachEngine::new(
            config,
            pose_db,
            RequirementDatabase::default(),
            dir.path().join("data"),
            NullSink,
        )
        .unwrap();
        (engine, dir)
    }

    fn library_with(name: &str, keypoints: Keypoints) -> BTreeMap<String, Vec<ReferenceVariation>> {
        let mut raw = BTreeMap::new();
        raw.insert(
            name.to_string(),
            vec![ReferenceVariation {
                keypoints,
                source_image: "reference.jpg".to_string(),
                keypoint_count: 12,
            }],
        );
        raw
    }

    #[test]
    fn missing_hip_reports_unknown() {
        let (mut engine, _dir) = engine_with_library(library_with("tree_pose", full_body()));
        let mut body = full_body();
        body.remove("left_hip");

        let report = engine.process_frame(&body);
        assert_eq!(report.pose, "unknown");
        assert!(report.score.is_infinite());
        assert_eq!(report.confidence, 0.0);
        assert!(report.analyses.is_empty());
        assert_eq!(report.grade, "No data");
        assert!(!report.feedback_given);
    }

    #[test]
    fn exact_copy_matches_its_reference() {
        let (mut engine, _dir) = engine_with_library(library_with("tree_pose", full_body()));
        let report = engine.process_frame(&full_body());

        assert_eq!(report.pose, "tree_pose");
        assert!(report.score < 1e-6, "score {}", report.score);
        assert!(report.confidence > 0.99);
        // The first confident frame only starts the hold timer.
        assert!(!report.feedback_given);
    }

    #[test]
    fn far_pose_is_rejected_by_threshold() {
        let (mut engine, _dir) = engine_with_library(library_with("tree_pose", full_body()));
        // A zigzag shape nothing like the humanoid reference.
        let body: Keypoints = matcher::KEY_JOINTS
            .iter()
            .enumerate()
            .map(|(i, name)| {
                (name.to_string(), Keypoint::new(i as f32 * 0.5, (i % 2) as f32))
            })
            .collect();

        let report = engine.process_frame(&body);
        assert_eq!(report.pose, "unknown");
        assert!(report.score.is_finite());
        assert!(report.analyses.is_empty());
    }

    #[test]
    fn matched_pose_is_analyzed_and_graded() {
        let body = full_body();
        let (mut engine, _dir) = engine_with_library(library_with("warrior_2", body.clone()));
        let report = engine.process_frame(&body);

        assert_eq!(report.pose, "warrior_2");
        assert!(!report.analyses.is_empty());
        assert!(report.overall_score > 0.0);
        assert!(!report.grade.is_empty());
        assert_ne!(report.grade, "No data");
    }

    #[test]
    fn finish_session_returns_summary() {
        let (engine, _dir) = engine_with_library(library_with("tree_pose", full_body()));
        let summary = engine.finish_session();
        assert_eq!(summary.measurements_taken, 0);
    }
}
