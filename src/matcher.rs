use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{Keypoint, Keypoints};

/// The 12 major limb/torso joints used for pose comparison.
pub const KEY_JOINTS: [&str; 12] = [
    "left_shoulder",
    "right_shoulder",
    "left_elbow",
    "right_elbow",
    "left_wrist",
    "right_wrist",
    "left_hip",
    "right_hip",
    "left_knee",
    "right_knee",
    "left_ankle",
    "right_ankle",
];

/// Center a keypoint set on the hip midpoint and scale by torso length.
///
/// Fails (`None`) when either hip is missing — a pose that cannot be anchored
/// is unusable for matching, never partially normalized. A degenerate torso
/// length of exactly 0 is floored to 1.0.
pub fn normalize(keypoints: &Keypoints) -> Option<Keypoints> {
    let left_hip = keypoints.get("left_hip")?;
    let right_hip = keypoints.get("right_hip")?;

    let hip_center = Keypoint::new(
        (left_hip.x + right_hip.x) / 2.0,
        (left_hip.y + right_hip.y) / 2.0,
    );

    let torso_length = match (keypoints.get("left_shoulder"), keypoints.get("right_shoulder")) {
        (Some(ls), Some(rs)) => {
            let shoulder_center =
                Keypoint::new((ls.x + rs.x) / 2.0, (ls.y + rs.y) / 2.0);
            let len = ((shoulder_center.x - hip_center.x).powi(2)
                + (shoulder_center.y - hip_center.y).powi(2))
            .sqrt();
            if len == 0.0 {
                1.0
            } else {
                len
            }
        }
        _ => 1.0,
    };

    let normalized = keypoints
        .iter()
        .map(|(joint, p)| {
            let q = Keypoint::new(
                (p.x - hip_center.x) / torso_length,
                (p.y - hip_center.y) / torso_length,
            );
            (joint.clone(), q)
        })
        .collect();

    Some(normalized)
}

/// Mean squared joint distance over the key joints present in both poses.
/// No common joints means the poses are incomparable: infinity.
pub fn pose_similarity(a: &Keypoints, b: &Keypoints) -> f32 {
    let mut sum = 0.0f32;
    let mut count = 0usize;

    for joint in KEY_JOINTS {
        if let (Some(p), Some(q)) = (a.get(joint), b.get(joint)) {
            let d2 = (p.x - q.x).powi(2) + (p.y - q.y).powi(2);
            sum += d2;
            count += 1;
        }
    }

    if count == 0 {
        f32::INFINITY
    } else {
        sum / count as f32
    }
}

/// One reference variation as stored in the library file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceVariation {
    pub keypoints: Keypoints,
    #[serde(default = "unknown_source")]
    pub source_image: String,
    #[serde(default)]
    pub keypoint_count: usize,
}

fn unknown_source() -> String {
    "unknown".to_string()
}

#[derive(Debug, Deserialize)]
struct LibraryFile {
    pose_data: BTreeMap<String, Vec<ReferenceVariation>>,
}

/// Preprocessed variation held in memory: keypoints already normalized.
#[derive(Debug, Clone)]
struct NormalizedVariation {
    keypoints: Keypoints,
    source_image: String,
    keypoint_count: usize,
}

/// Per-pose library statistics.
#[derive(Debug, Clone, Serialize)]
pub struct PoseInfo {
    pub name: String,
    pub variations: usize,
    pub avg_keypoints: f32,
}

/// Details about the winning reference variation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MatchDetails {
    pub source_image: String,
    pub reference_keypoints: usize,
    pub detected_keypoints: usize,
}

/// Result of a library lookup.
#[derive(Debug, Clone)]
pub struct PoseMatch {
    pub name: String,
    pub score: f32,
    pub details: MatchDetails,
}

impl PoseMatch {
    fn unknown(score: f32) -> Self {
        Self {
            name: "unknown".to_string(),
            score,
            details: MatchDetails::default(),
        }
    }
}

/// Read-only reference pose library with pre-normalized variations.
///
/// Built offline from images, loaded once at startup, never mutated during a
/// session. Iteration order is the BTreeMap's pose-name order, then variation
/// order within a pose; ties on score go to the first variation encountered.
pub struct PoseDatabase {
    poses: BTreeMap<String, Vec<NormalizedVariation>>,
    similarity_threshold: f32,
    lookup_count: u64,
    total_lookup_time: Duration,
}

impl PoseDatabase {
    pub fn load(path: impl AsRef<Path>, similarity_threshold: f32) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading pose library {}", path.display()))?;
        let file: LibraryFile = serde_json::from_str(&raw)
            .with_context(|| format!("parsing pose library {}", path.display()))?;

        let db = Self::from_raw(file.pose_data, similarity_threshold);
        info!(
            poses = db.poses.len(),
            variations = db.variation_count(),
            "pose library loaded"
        );
        Ok(db)
    }

    /// Like `load`, but a missing or unreadable library degrades to an empty
    /// database (every frame will match "unknown") instead of failing startup.
    pub fn load_or_empty(path: impl AsRef<Path>, similarity_threshold: f32) -> Self {
        match Self::load(&path, similarity_threshold) {
            Ok(db) => db,
            Err(e) => {
                warn!(error = %e, "pose library unavailable, matching disabled");
                Self::from_raw(BTreeMap::new(), similarity_threshold)
            }
        }
    }

    pub fn from_raw(
        raw: BTreeMap<String, Vec<ReferenceVariation>>,
        similarity_threshold: f32,
    ) -> Self {
        let mut poses = BTreeMap::new();

        for (pose_name, variations) in raw {
            let mut normalized_variations = Vec::new();
            for variation in variations {
                // Variations that cannot be normalized (no hips) are useless
                // for matching and dropped at load time.
                let Some(normalized) = normalize(&variation.keypoints) else {
                    warn!(pose = %pose_name, source = %variation.source_image,
                          "dropping reference variation without hip keypoints");
                    continue;
                };
                normalized_variations.push(NormalizedVariation {
                    keypoints: normalized,
                    source_image: variation.source_image,
                    keypoint_count: variation.keypoint_count,
                });
            }
            if !normalized_variations.is_empty() {
                poses.insert(pose_name, normalized_variations);
            }
        }

        Self {
            poses,
            similarity_threshold,
            lookup_count: 0,
            total_lookup_time: Duration::ZERO,
        }
    }

    pub fn is_loaded(&self) -> bool {
        !self.poses.is_empty()
    }

    pub fn pose_names(&self) -> Vec<&str> {
        self.poses.keys().map(String::as_str).collect()
    }

    pub fn variation_count(&self) -> usize {
        self.poses.values().map(Vec::len).sum()
    }

    pub fn pose_info(&self, pose_name: &str) -> Option<PoseInfo> {
        let variations = self.poses.get(pose_name)?;
        let avg = variations
            .iter()
            .map(|v| v.keypoint_count as f32)
            .sum::<f32>()
            / variations.len() as f32;
        Some(PoseInfo {
            name: pose_name.to_string(),
            variations: variations.len(),
            avg_keypoints: avg,
        })
    }

    /// Nearest-neighbor lookup over every variation of every pose.
    ///
    /// A live pose that fails normalization matches "unknown" at infinite
    /// distance. A best score above the similarity threshold is also forced
    /// to "unknown" — the numeric score is kept for diagnostics.
    pub fn find_best_match(&mut self, keypoints: &Keypoints) -> PoseMatch {
        let start = Instant::now();

        let result = match normalize(keypoints) {
            None => PoseMatch::unknown(f32::INFINITY),
            Some(live) => {
                let mut best = PoseMatch::unknown(f32::INFINITY);

                for (pose_name, variations) in &self.poses {
                    for variation in variations {
                        let score = pose_similarity(&live, &variation.keypoints);
                        if score < best.score {
                            best = PoseMatch {
                                name: pose_name.clone(),
                                score,
                                details: MatchDetails {
                                    source_image: variation.source_image.clone(),
                                    reference_keypoints: variation.keypoint_count,
                                    detected_keypoints: keypoints.len(),
                                },
                            };
                        }
                    }
                }

                if best.score > self.similarity_threshold {
                    best.name = "unknown".to_string();
                }
                best
            }
        };

        self.lookup_count += 1;
        self.total_lookup_time += start.elapsed();
        result
    }

    pub fn lookup_count(&self) -> u64 {
        self.lookup_count
    }

    pub fn avg_lookup_time(&self) -> Duration {
        if self.lookup_count == 0 {
            Duration::ZERO
        } else {
            self.total_lookup_time / self.lookup_count as u32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(hip_y: f32) -> Keypoints {
        let mut kps = Keypoints::new();
        for (name, x, y) in [
            ("left_shoulder", 0.35, 0.25),
            ("right_shoulder", 0.65, 0.25),
            ("left_hip", 0.42, hip_y),
            ("right_hip", 0.58, hip_y),
            ("left_knee", 0.40, 0.70),
            ("right_knee", 0.60, 0.70),
            ("left_ankle", 0.38, 0.90),
            ("right_ankle", 0.62, 0.90),
        ] {
            kps.insert(name.to_string(), Keypoint::new(x, y));
        }
        kps
    }

    fn library_with(name: &str, kps: &Keypoints) -> PoseDatabase {
        let mut raw = BTreeMap::new();
        raw.insert(
            name.to_string(),
            vec![ReferenceVariation {
                keypoints: kps.clone(),
                source_image: "ref1.jpg".to_string(),
                keypoint_count: kps.len(),
            }],
        );
        PoseDatabase::from_raw(raw, 0.15)
    }

    #[test]
    fn normalize_requires_both_hips() {
        let mut kps = body(0.5);
        kps.remove("left_hip");
        assert!(normalize(&kps).is_none());
    }

    #[test]
    fn normalize_centers_on_hips() {
        let norm = normalize(&body(0.5)).unwrap();
        let lh = norm["left_hip"];
        let rh = norm["right_hip"];
        assert!(((lh.x + rh.x) / 2.0).abs() < 1e-5);
        assert!(((lh.y + rh.y) / 2.0).abs() < 1e-5);
    }

    #[test]
    fn normalize_is_idempotent() {
        let once = normalize(&body(0.5)).unwrap();
        let twice = normalize(&once).unwrap();
        for (joint, p) in &once {
            let q = twice[joint];
            assert!((p.x - q.x).abs() < 1e-4, "{joint} x drifted");
            assert!((p.y - q.y).abs() < 1e-4, "{joint} y drifted");
        }
    }

    #[test]
    fn normalize_floors_degenerate_scale() {
        // Shoulders coincide with the hip center: torso length is 0.
        let mut kps = Keypoints::new();
        kps.insert("left_hip".into(), Keypoint::new(0.4, 0.5));
        kps.insert("right_hip".into(), Keypoint::new(0.6, 0.5));
        kps.insert("left_shoulder".into(), Keypoint::new(0.5, 0.5));
        kps.insert("right_shoulder".into(), Keypoint::new(0.5, 0.5));
        let norm = normalize(&kps).unwrap();
        assert!(norm["left_hip"].x.is_finite());
        assert!((norm["left_hip"].x - (-0.1)).abs() < 1e-5);
    }

    #[test]
    fn disjoint_poses_are_incomparable() {
        let mut a = Keypoints::new();
        a.insert("left_knee".into(), Keypoint::new(0.0, 0.0));
        let mut b = Keypoints::new();
        b.insert("right_knee".into(), Keypoint::new(0.0, 0.0));
        assert!(pose_similarity(&a, &b).is_infinite());
    }

    #[test]
    fn exact_copy_matches_with_near_zero_score() {
        let kps = body(0.5);
        let mut db = library_with("tree_pose", &kps);
        let m = db.find_best_match(&kps);
        assert_eq!(m.name, "tree_pose");
        assert!(m.score < 1e-6);
        assert_eq!(m.details.source_image, "ref1.jpg");
    }

    #[test]
    fn missing_hip_matches_unknown_at_infinity() {
        let kps = body(0.5);
        let mut db = library_with("tree_pose", &kps);
        let mut query = kps.clone();
        query.remove("left_hip");
        let m = db.find_best_match(&query);
        assert_eq!(m.name, "unknown");
        assert!(m.score.is_infinite());
        assert!(m.details.source_image.is_empty());
    }

    #[test]
    fn score_above_threshold_forces_unknown() {
        let kps = body(0.5);
        let mut db = library_with("tree_pose", &kps);
        // A very different body: arms-down reference vs hips shifted far up.
        let query = body(0.1);
        let m = db.find_best_match(&query);
        if m.score > 0.15 {
            assert_eq!(m.name, "unknown");
        }
        // Force the situation regardless of geometry with a zero threshold.
        let mut strict = PoseDatabase::from_raw(BTreeMap::new(), 0.0);
        strict.poses = db.poses.clone();
        let m = strict.find_best_match(&query);
        assert_eq!(m.name, "unknown");
        assert!(m.score.is_finite());
    }

    #[test]
    fn tie_break_is_first_pose_in_order() {
        let kps = body(0.5);
        let mut raw = BTreeMap::new();
        let variation = ReferenceVariation {
            keypoints: kps.clone(),
            source_image: "same.jpg".to_string(),
            keypoint_count: kps.len(),
        };
        raw.insert("b_pose".to_string(), vec![variation.clone()]);
        raw.insert("a_pose".to_string(), vec![variation]);
        let mut db = PoseDatabase::from_raw(raw, 0.15);
        // Identical variations under two names: the strictly-less comparison
        // keeps the first hit, which is "a_pose" in BTreeMap order.
        assert_eq!(db.find_best_match(&kps).name, "a_pose");
    }

    #[test]
    fn lookup_counters_accumulate() {
        let kps = body(0.5);
        let mut db = library_with("tree_pose", &kps);
        for _ in 0..5 {
            db.find_best_match(&kps);
        }
        assert_eq!(db.lookup_count(), 5);
    }

    #[test]
    fn variations_without_hips_are_dropped_at_load() {
        let mut bad = body(0.5);
        bad.remove("right_hip");
        let mut raw = BTreeMap::new();
        raw.insert(
            "headstand".to_string(),
            vec![ReferenceVariation {
                keypoints: bad,
                source_image: "bad.jpg".to_string(),
                keypoint_count: 7,
            }],
        );
        let db = PoseDatabase::from_raw(raw, 0.15);
        assert!(!db.is_loaded());
    }
}
