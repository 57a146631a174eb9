// src/positions.rs - Landmark distance similarity
use crate::landmarks::*;
use crate::smoothing::Smoother;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Head, arms and legs. Face detail and hands are too noisy to score.
pub fn default_active_landmarks() -> Vec<usize> {
    vec![
        NOSE,
        LEFT_SHOULDER,
        RIGHT_SHOULDER,
        LEFT_ELBOW,
        RIGHT_ELBOW,
        LEFT_WRIST,
        RIGHT_WRIST,
        LEFT_HIP,
        RIGHT_HIP,
        LEFT_KNEE,
        RIGHT_KNEE,
        LEFT_ANKLE,
        RIGHT_ANKLE,
        LEFT_HEEL,
        RIGHT_HEEL,
        LEFT_FOOT_INDEX,
        RIGHT_FOOT_INDEX,
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionConfig {
    pub landmarks: Vec<usize>,
    /// Normalized distance below which a landmark counts as matched.
    pub distance_threshold: f64,
    /// EMA weight of the newest distance sample.
    pub smoothing_alpha: f64,
    pub use_depth: bool,
}

impl Default for PositionConfig {
    fn default() -> Self {
        Self {
            landmarks: default_active_landmarks(),
            distance_threshold: 0.15,
            smoothing_alpha: 0.3,
            use_depth: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PositionComparison {
    /// `1 - mean distance`, floored at zero.
    pub score: f64,
    pub accuracy: f64,
    pub matches: BTreeMap<usize, bool>,
    pub distances: BTreeMap<usize, f64>,
}

impl PositionComparison {
    pub fn compared(&self) -> usize {
        self.matches.len()
    }
}

/// Compares configured landmarks that are visible in both poses.
///
/// Distances are smoothed per landmark id before thresholding. Landmarks
/// missing on either side are left out entirely.
pub fn compare_positions(
    performer: &Pose,
    reference: &Pose,
    smoother: &mut Smoother<usize>,
    config: &PositionConfig,
) -> PositionComparison {
    let mut result = PositionComparison::default();
    let mut distance_sum = 0.0;
    let mut matched = 0usize;

    for &id in &config.landmarks {
        let (Some(p), Some(r)) = (performer.visible(id), reference.visible(id)) else {
            continue;
        };
        let raw = (p.point(config.use_depth) - r.point(config.use_depth)).norm();
        let distance = smoother.apply(id, raw);
        let is_match = distance < config.distance_threshold;
        if is_match {
            matched += 1;
        }
        distance_sum += distance;
        result.distances.insert(id, distance);
        result.matches.insert(id, is_match);
    }

    let total = result.matches.len();
    if total == 0 {
        return result;
    }
    result.score = (1.0 - distance_sum / total as f64).max(0.0);
    result.accuracy = matched as f64 / total as f64;
    result
}

/// Configured landmarks currently visible in `pose`.
pub fn visible_active_count(pose: &Pose, config: &PositionConfig) -> usize {
    config
        .landmarks
        .iter()
        .filter(|&&id| pose.visible(id).is_some())
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn config() -> PositionConfig {
        PositionConfig {
            smoothing_alpha: 1.0,
            ..PositionConfig::default()
        }
    }

    fn pose_with(points: &[(usize, f64, f64, f64)]) -> Pose {
        let mut pose = Pose::empty();
        for &(id, x, y, vis) in points {
            pose.set(id, Some(Landmark::new(x, y, 0.0, vis)));
        }
        pose
    }

    #[test]
    fn test_identical_poses_score_perfectly() {
        let pose = pose_with(&[(NOSE, 0.5, 0.1, 1.0), (LEFT_WRIST, 0.3, 0.5, 0.9)]);
        let mut smoother = Smoother::new(1.0);
        let result = compare_positions(&pose, &pose, &mut smoother, &config());
        assert_eq!(result.score, 1.0);
        assert_eq!(result.accuracy, 1.0);
        assert_eq!(result.compared(), 2);
    }

    #[test]
    fn test_partial_match() {
        let performer = pose_with(&[(NOSE, 0.5, 0.1, 1.0), (LEFT_WRIST, 0.3, 0.5, 1.0)]);
        let reference = pose_with(&[(NOSE, 0.5, 0.1, 1.0), (LEFT_WRIST, 0.3, 0.9, 1.0)]);
        let mut smoother = Smoother::new(1.0);
        let result = compare_positions(&performer, &reference, &mut smoother, &config());
        assert!(result.matches[&NOSE]);
        assert!(!result.matches[&LEFT_WRIST]);
        assert_eq!(result.accuracy, 0.5);
        assert_abs_diff_eq!(result.score, 0.8, epsilon = 1e-9);
    }

    #[test]
    fn test_invisible_performer_yields_empty() {
        let performer = pose_with(&[(NOSE, 0.5, 0.1, 0.1), (LEFT_WRIST, 0.3, 0.5, 0.4)]);
        let reference = pose_with(&[(NOSE, 0.5, 0.1, 1.0), (LEFT_WRIST, 0.3, 0.5, 1.0)]);
        let mut smoother = Smoother::new(1.0);
        let result = compare_positions(&performer, &reference, &mut smoother, &config());
        assert_eq!(result.accuracy, 0.0);
        assert_eq!(result.score, 0.0);
        assert!(result.matches.is_empty());
        assert!(smoother.is_empty());
    }

    #[test]
    fn test_landmarks_outside_subset_ignored() {
        let performer = pose_with(&[(LEFT_EYE, 0.0, 0.0, 1.0)]);
        let reference = pose_with(&[(LEFT_EYE, 0.9, 0.9, 1.0)]);
        let mut smoother = Smoother::new(1.0);
        let result = compare_positions(&performer, &reference, &mut smoother, &config());
        assert!(result.matches.is_empty());
    }

    #[test]
    fn test_distance_is_smoothed() {
        let reference = pose_with(&[(NOSE, 0.5, 0.5, 1.0)]);
        let cfg = PositionConfig {
            smoothing_alpha: 0.5,
            ..PositionConfig::default()
        };
        let mut smoother = Smoother::new(cfg.smoothing_alpha);
        compare_positions(&reference, &reference, &mut smoother, &cfg);
        let far = pose_with(&[(NOSE, 0.5, 0.9, 1.0)]);
        let result = compare_positions(&far, &reference, &mut smoother, &cfg);
        // raw 0.4 smoothed with prior 0.0 => 0.2
        assert_abs_diff_eq!(result.distances[&NOSE], 0.2, epsilon = 1e-9);
        assert!(!result.matches[&NOSE]);
    }
}
