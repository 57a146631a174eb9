// src/angles.rs - Joint angle extraction and angle-based similarity
use crate::landmarks::*;
use crate::smoothing::Smoother;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Guards the cosine denominator against zero-length limbs.
const ANGLE_EPSILON: f64 = 1e-9;

/// Joint angle in degrees by name; `None` when it could not be measured.
pub type AngleMap = BTreeMap<String, Option<f64>>;

/// Angle measured at `vertex` between `first` and `second`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JointTriple {
    pub name: String,
    pub first: usize,
    pub vertex: usize,
    pub second: usize,
}

impl JointTriple {
    pub fn new(name: &str, first: usize, vertex: usize, second: usize) -> Self {
        Self {
            name: name.to_string(),
            first,
            vertex,
            second,
        }
    }
}

pub fn default_joints() -> Vec<JointTriple> {
    vec![
        JointTriple::new("left_shoulder", LEFT_ELBOW, LEFT_SHOULDER, LEFT_HIP),
        JointTriple::new("right_shoulder", RIGHT_ELBOW, RIGHT_SHOULDER, RIGHT_HIP),
        JointTriple::new("left_elbow", LEFT_SHOULDER, LEFT_ELBOW, LEFT_WRIST),
        JointTriple::new("right_elbow", RIGHT_SHOULDER, RIGHT_ELBOW, RIGHT_WRIST),
        JointTriple::new("left_knee", LEFT_HIP, LEFT_KNEE, LEFT_ANKLE),
        JointTriple::new("right_knee", RIGHT_HIP, RIGHT_KNEE, RIGHT_ANKLE),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AngleConfig {
    pub joints: Vec<JointTriple>,
    /// Angular difference (degrees) at which similarity reaches zero.
    pub range_deg: f64,
    /// Similarity needed for a joint to count as matched.
    pub similarity_threshold: f64,
    /// EMA weight of the newest performer angle.
    pub smoothing_alpha: f64,
    /// Unmatched joints forgiven before accuracy drops.
    pub allowed_misses: usize,
    pub use_depth: bool,
}

impl Default for AngleConfig {
    fn default() -> Self {
        Self {
            joints: default_joints(),
            range_deg: 180.0,
            similarity_threshold: 0.89,
            smoothing_alpha: 0.4,
            allowed_misses: 1,
            use_depth: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AngleComparison {
    pub accuracy: f64,
    pub matches: BTreeMap<String, bool>,
    pub similarities: BTreeMap<String, f64>,
}

impl AngleComparison {
    pub fn compared(&self) -> usize {
        self.matches.len()
    }
}

/// Interior angle at `vertex` in degrees, always within [0, 180].
pub fn joint_angle(first: &Vector3<f64>, vertex: &Vector3<f64>, second: &Vector3<f64>) -> f64 {
    let v1 = first - vertex;
    let v2 = second - vertex;
    let cos = v1.dot(&v2) / (v1.norm() * v2.norm() + ANGLE_EPSILON);
    cos.clamp(-1.0, 1.0).acos().to_degrees()
}

pub fn compute_angles(pose: &Pose, joints: &[JointTriple], use_depth: bool) -> AngleMap {
    joints
        .iter()
        .map(|joint| {
            let angle = match (
                pose.visible(joint.first),
                pose.visible(joint.vertex),
                pose.visible(joint.second),
            ) {
                (Some(a), Some(v), Some(b)) => {
                    let angle = joint_angle(&a.point(use_depth), &v.point(use_depth), &b.point(use_depth));
                    angle.is_finite().then_some(angle)
                }
                _ => None,
            };
            (joint.name.clone(), angle)
        })
        .collect()
}

/// Number of angles that were actually measured.
pub fn present_count(angles: &AngleMap) -> usize {
    angles.values().filter(|a| a.is_some()).count()
}

/// Scores performer angles against the reference.
///
/// Only joints present in the reference participate. Performer angles are
/// smoothed through `smoother` before comparison; a joint missing on the
/// performer side is a non-match and leaves its history untouched.
pub fn compare_angles(
    performer: &AngleMap,
    reference: &AngleMap,
    smoother: &mut Smoother<String>,
    config: &AngleConfig,
) -> AngleComparison {
    let mut result = AngleComparison::default();
    let range = config.range_deg.max(ANGLE_EPSILON);
    let mut matched = 0usize;

    for (name, reference_angle) in reference {
        let Some(reference_angle) = reference_angle else {
            continue;
        };
        let similarity = match performer.get(name).copied().flatten() {
            Some(raw) => {
                let smoothed = smoother.apply(name.clone(), raw);
                (1.0 - (smoothed - reference_angle).abs() / range).max(0.0)
            }
            None => 0.0,
        };
        let is_match = similarity >= config.similarity_threshold;
        if is_match {
            matched += 1;
        }
        result.similarities.insert(name.clone(), similarity);
        result.matches.insert(name.clone(), is_match);
    }

    let total = result.matches.len();
    if total == 0 {
        return result;
    }
    let denominator = total.saturating_sub(config.allowed_misses).max(1);
    result.accuracy = (matched as f64 / denominator as f64).clamp(0.0, 1.0);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn single(name: &str, value: Option<f64>) -> AngleMap {
        let mut map = AngleMap::new();
        map.insert(name.to_string(), value);
        map
    }

    fn strict_config() -> AngleConfig {
        AngleConfig {
            similarity_threshold: 0.9,
            range_deg: 180.0,
            allowed_misses: 0,
            smoothing_alpha: 1.0,
            ..AngleConfig::default()
        }
    }

    fn arm_pose(elbow_bend: bool) -> Pose {
        let mut pose = Pose::empty();
        pose.set(LEFT_SHOULDER, Some(Landmark::new(0.5, 0.2, 0.0, 1.0)));
        pose.set(LEFT_ELBOW, Some(Landmark::new(0.5, 0.4, 0.0, 1.0)));
        let wrist = if elbow_bend { (0.7, 0.4) } else { (0.5, 0.6) };
        pose.set(LEFT_WRIST, Some(Landmark::new(wrist.0, wrist.1, 0.0, 1.0)));
        pose
    }

    #[test]
    fn test_right_and_straight_angles() {
        let joints = default_joints();
        let bent = compute_angles(&arm_pose(true), &joints, false);
        assert_abs_diff_eq!(bent["left_elbow"].unwrap(), 90.0, epsilon = 1e-6);
        let straight = compute_angles(&arm_pose(false), &joints, false);
        assert_abs_diff_eq!(straight["left_elbow"].unwrap(), 180.0, epsilon = 0.05);
        assert_eq!(straight["right_knee"], None);
    }

    #[test]
    fn test_degenerate_limb_is_not_nan() {
        let p = Vector3::new(0.3, 0.3, 0.0);
        let angle = joint_angle(&p, &p, &p);
        assert!(angle.is_finite());
        assert!((0.0..=180.0).contains(&angle));
    }

    #[test]
    fn test_random_poses_stay_in_range() {
        let mut rng = StdRng::seed_from_u64(42);
        let joints = default_joints();
        for _ in 0..2000 {
            let mut pose = Pose::empty();
            let anchor = Landmark::new(rng.gen_range(-2.0..2.0), rng.gen_range(-2.0..2.0), 0.0, 1.0);
            for id in 0..LANDMARK_COUNT {
                let landmark = match rng.gen_range(0..10) {
                    // collapsed limbs and near-collinear points
                    0 => anchor,
                    1 => Landmark {
                        x: anchor.x + rng.gen_range(-1e-12..1e-12),
                        ..anchor
                    },
                    _ => Landmark::new(
                        rng.gen_range(-2.0..2.0),
                        rng.gen_range(-2.0..2.0),
                        rng.gen_range(-1.0..1.0),
                        rng.gen_range(0.0..1.0),
                    ),
                };
                pose.set(id, Some(landmark));
            }
            for use_depth in [false, true] {
                for (name, angle) in compute_angles(&pose, &joints, use_depth) {
                    if let Some(angle) = angle {
                        assert!(angle.is_finite(), "{name}: {angle}");
                        assert!((0.0..=180.0).contains(&angle), "{name}: {angle}");
                    }
                }
            }
        }
    }

    #[test]
    fn test_low_visibility_vertex_is_absent() {
        let mut pose = arm_pose(true);
        pose.set(LEFT_ELBOW, Some(Landmark::new(0.5, 0.4, 0.0, 0.2)));
        let angles = compute_angles(&pose, &default_joints(), false);
        assert_eq!(angles["left_elbow"], None);
    }

    #[test]
    fn test_knee_scenario_match_then_miss() {
        let config = strict_config();
        let mut smoother = Smoother::new(config.smoothing_alpha);
        let performer = single("knee", Some(90.0));

        let at_zero = compare_angles(&performer, &single("knee", Some(90.0)), &mut smoother, &config);
        assert!(at_zero.matches["knee"]);
        assert_abs_diff_eq!(at_zero.accuracy, 1.0, epsilon = 1e-6);

        let at_one = compare_angles(&performer, &single("knee", Some(150.0)), &mut smoother, &config);
        assert_abs_diff_eq!(at_one.similarities["knee"], 1.0 - 60.0 / 180.0, epsilon = 1e-6);
        assert!(!at_one.matches["knee"]);
        assert_abs_diff_eq!(at_one.accuracy, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_missing_performer_angle_is_non_match() {
        let config = strict_config();
        let mut smoother = Smoother::new(1.0);
        let result = compare_angles(&single("knee", None), &single("knee", Some(90.0)), &mut smoother, &config);
        assert!(!result.matches["knee"]);
        assert_eq!(result.similarities["knee"], 0.0);
        assert!(smoother.is_empty());
    }

    #[test]
    fn test_all_absent_reference_is_empty() {
        let config = strict_config();
        let mut smoother = Smoother::new(1.0);
        let result = compare_angles(&single("knee", Some(90.0)), &single("knee", None), &mut smoother, &config);
        assert_eq!(result.accuracy, 0.0);
        assert!(result.matches.is_empty());
    }

    #[test]
    fn test_allowed_misses_absorb_one_bad_joint() {
        let config = AngleConfig {
            allowed_misses: 1,
            ..strict_config()
        };
        let mut smoother = Smoother::new(1.0);
        let mut reference = AngleMap::new();
        let mut performer = AngleMap::new();
        for name in ["a", "b", "c"] {
            reference.insert(name.to_string(), Some(100.0));
            performer.insert(name.to_string(), Some(100.0));
        }
        performer.insert("c".to_string(), None);
        let result = compare_angles(&performer, &reference, &mut smoother, &config);
        assert_abs_diff_eq!(result.accuracy, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_smoothing_damps_jumps() {
        let config = AngleConfig {
            smoothing_alpha: 0.5,
            ..strict_config()
        };
        let mut smoother = Smoother::new(config.smoothing_alpha);
        let reference = single("knee", Some(90.0));
        compare_angles(&single("knee", Some(90.0)), &reference, &mut smoother, &config);
        let jumped = compare_angles(&single("knee", Some(180.0)), &reference, &mut smoother, &config);
        // smoothed to 135 => similarity 0.75
        assert_abs_diff_eq!(jumped.similarities["knee"], 0.75, epsilon = 1e-6);
    }
}
