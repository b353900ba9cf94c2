use std::collections::BTreeMap;

use crate::{Keypoint, Keypoints};

/// Angle at `p2` formed by the rays to `p1` and `p3`, in degrees [0, 180].
///
/// Returns `None` when a ray is degenerate (coincident points), so a missing
/// measurement can never be confused with a real angle downstream.
pub fn three_point_angle(p1: Keypoint, p2: Keypoint, p3: Keypoint) -> Option<f32> {
    let v1 = (p1.x - p2.x, p1.y - p2.y);
    let v2 = (p3.x - p2.x, p3.y - p2.y);

    let n1 = (v1.0 * v1.0 + v1.1 * v1.1).sqrt();
    let n2 = (v2.0 * v2.0 + v2.1 * v2.1).sqrt();
    if n1 == 0.0 || n2 == 0.0 {
        return None;
    }

    let cos = (v1.0 * v2.0 + v1.1 * v2.1) / (n1 * n2);
    // Clamp before acos: floating point drift can push |cos| past 1.
    Some(cos.clamp(-1.0, 1.0).acos().to_degrees())
}

/// Angle of the line p1→p2 from horizontal, in degrees (-180, 180].
pub fn line_angle(p1: Keypoint, p2: Keypoint) -> f32 {
    (p2.y - p1.y).atan2(p2.x - p1.x).to_degrees()
}

fn midpoint(a: Keypoint, b: Keypoint) -> Keypoint {
    Keypoint::new((a.x + b.x) / 2.0, (a.y + b.y) / 2.0)
}

/// Compute the fixed set of named body angles from a keypoint map.
///
/// Angles whose required keypoints are missing are skipped, and the result is
/// filtered to [0, 180] — the same final filter the live coach applies, which
/// also drops negative line-angle tilts.
pub fn pose_angles(keypoints: &Keypoints) -> BTreeMap<String, f32> {
    let mut angles = BTreeMap::new();
    let kp = |name: &str| keypoints.get(name).copied();

    let mut three = |name: &str, a: &str, b: &str, c: &str| {
        if let (Some(a), Some(b), Some(c)) = (kp(a), kp(b), kp(c)) {
            if let Some(deg) = three_point_angle(a, b, c) {
                angles.insert(name.to_string(), deg);
            }
        }
    };

    three("left_knee", "left_hip", "left_knee", "left_ankle");
    three("right_knee", "right_hip", "right_knee", "right_ankle");
    three("left_elbow", "left_shoulder", "left_elbow", "left_wrist");
    three("right_elbow", "right_shoulder", "right_elbow", "right_wrist");
    // Thigh-to-torso
    three("left_hip", "left_shoulder", "left_hip", "left_knee");
    three("right_hip", "right_shoulder", "right_hip", "right_knee");
    // Arm-to-torso
    three("left_arm_torso", "left_hip", "left_shoulder", "left_elbow");
    three("right_arm_torso", "right_hip", "right_shoulder", "right_elbow");

    if let (Some(ls), Some(rs)) = (kp("left_shoulder"), kp("right_shoulder")) {
        angles.insert("shoulder_line".to_string(), line_angle(ls, rs));
    }
    if let (Some(lh), Some(rh)) = (kp("left_hip"), kp("right_hip")) {
        angles.insert("hip_line".to_string(), line_angle(lh, rh));
    }

    // Spine verticality: deviation of the hip-center → shoulder-center line
    // from 90 degrees.
    if let (Some(ls), Some(rs), Some(lh), Some(rh)) = (
        kp("left_shoulder"),
        kp("right_shoulder"),
        kp("left_hip"),
        kp("right_hip"),
    ) {
        let spine = line_angle(midpoint(lh, rh), midpoint(ls, rs));
        angles.insert("spine_vertical".to_string(), (spine - 90.0).abs());
    }

    angles.retain(|_, v| (0.0..=180.0).contains(v));
    angles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Keypoint;

    fn p(x: f32, y: f32) -> Keypoint {
        Keypoint::new(x, y)
    }

    #[test]
    fn right_angle() {
        let a = three_point_angle(p(0.0, 1.0), p(0.0, 0.0), p(1.0, 0.0)).unwrap();
        assert!((a - 90.0).abs() < 1e-3);
    }

    #[test]
    fn straight_line_is_180() {
        let a = three_point_angle(p(-1.0, 0.0), p(0.0, 0.0), p(1.0, 0.0)).unwrap();
        assert!((a - 180.0).abs() < 1e-3);
    }

    #[test]
    fn symmetric_in_outer_points() {
        let (a, b, c) = (p(0.3, 0.9), p(0.4, 0.5), p(0.7, 0.2));
        let lhs = three_point_angle(a, b, c).unwrap();
        let rhs = three_point_angle(c, b, a).unwrap();
        assert!((lhs - rhs).abs() < 1e-4);
    }

    #[test]
    fn degenerate_ray_is_none() {
        assert!(three_point_angle(p(0.5, 0.5), p(0.5, 0.5), p(1.0, 1.0)).is_none());
    }

    #[test]
    fn nearly_collinear_does_not_panic() {
        // Cosine drifts just past 1.0 without the clamp.
        let a = three_point_angle(p(0.1, 0.1), p(0.2, 0.2), p(0.3, 0.3)).unwrap();
        assert!((0.0..=180.0).contains(&a));
    }

    #[test]
    fn line_angle_quadrants() {
        assert!((line_angle(p(0.0, 0.0), p(1.0, 0.0)) - 0.0).abs() < 1e-3);
        assert!((line_angle(p(0.0, 0.0), p(0.0, 1.0)) - 90.0).abs() < 1e-3);
        assert!((line_angle(p(0.0, 0.0), p(-1.0, 0.0)) - 180.0).abs() < 1e-3);
    }

    #[test]
    fn missing_keypoints_are_skipped() {
        let mut kps = Keypoints::new();
        kps.insert("left_hip".into(), p(0.4, 0.5));
        kps.insert("left_knee".into(), p(0.4, 0.7));
        // No left_ankle: left_knee angle cannot be measured.
        let angles = pose_angles(&kps);
        assert!(!angles.contains_key("left_knee"));
    }

    #[test]
    fn negative_line_angles_are_filtered() {
        let mut kps = Keypoints::new();
        // Right hip higher than left: hip_line comes out negative.
        kps.insert("left_hip".into(), p(0.4, 0.6));
        kps.insert("right_hip".into(), p(0.6, 0.4));
        let angles = pose_angles(&kps);
        assert!(!angles.contains_key("hip_line"));

        // Level hips at slight positive tilt survive the filter.
        let mut kps = Keypoints::new();
        kps.insert("left_hip".into(), p(0.4, 0.5));
        kps.insert("right_hip".into(), p(0.6, 0.52));
        let angles = pose_angles(&kps);
        assert!(angles.contains_key("hip_line"));
    }

    #[test]
    fn full_body_produces_expected_angle_set() {
        let mut kps = Keypoints::new();
        for (name, x, y) in [
            ("left_shoulder", 0.35, 0.25),
            ("right_shoulder", 0.65, 0.25),
            ("left_hip", 0.42, 0.50),
            ("right_hip", 0.58, 0.50),
            ("left_knee", 0.40, 0.70),
            ("right_knee", 0.60, 0.70),
            ("left_ankle", 0.38, 0.90),
            ("right_ankle", 0.62, 0.90),
            ("left_elbow", 0.20, 0.35),
            ("right_elbow", 0.80, 0.35),
            ("left_wrist", 0.15, 0.40),
            ("right_wrist", 0.85, 0.40),
        ] {
            kps.insert(name.into(), p(x, y));
        }
        let angles = pose_angles(&kps);
        for name in [
            "left_knee",
            "right_knee",
            "left_elbow",
            "right_elbow",
            "left_hip",
            "right_hip",
            "left_arm_torso",
            "right_arm_torso",
            "spine_vertical",
        ] {
            assert!(angles.contains_key(name), "missing {name}");
        }
        for v in angles.values() {
            assert!((0.0..=180.0).contains(v));
        }
    }
}
