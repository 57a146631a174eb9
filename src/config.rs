// src/config.rs - Tunables for matching, calibration and scoring
use crate::angles::AngleConfig;
use crate::calibration::CalibrationConfig;
use crate::error::{Error, Result};
use crate::landmarks::LANDMARK_COUNT;
use crate::positions::PositionConfig;
use crate::resolver::ResolverConfig;
use crate::scoring::ScoreConfig;
use crate::track::ReferenceConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Relative weight of each similarity signal in the fused accuracy.
/// A zero weight disables the signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalWeights {
    pub angle: f64,
    pub position: f64,
}

impl Default for SignalWeights {
    fn default() -> Self {
        Self {
            angle: 0.6,
            position: 0.4,
        }
    }
}

/// Minimum usable signal for a stream to count as tracked.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SufficiencyConfig {
    pub min_angles: usize,
    pub min_landmarks: usize,
}

impl Default for SufficiencyConfig {
    fn default() -> Self {
        Self {
            min_angles: 2,
            min_landmarks: 4,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    pub weights: SignalWeights,
    /// Fusion weights for qualifying calibration samples. Raw positions are
    /// not yet scaled then, so an angle-only setting can make sense here.
    pub calibration_weights: SignalWeights,
    pub angles: AngleConfig,
    pub positions: PositionConfig,
    pub calibration: CalibrationConfig,
    pub reference: ReferenceConfig,
    pub resolver: ResolverConfig,
    pub scoring: ScoreConfig,
    pub sufficiency: SufficiencyConfig,
}

impl MatchConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: MatchConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Loads `path`, writing the defaults there first if it does not exist.
    pub fn load_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            return Self::load(path);
        }
        let config = Self::default();
        config.save(path)?;
        tracing::info!(path = %path.display(), "wrote default configuration");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, w) in [("weights", &self.weights), ("calibration_weights", &self.calibration_weights)] {
            if w.angle < 0.0 || w.position < 0.0 || !w.angle.is_finite() || !w.position.is_finite() {
                return Err(invalid(&format!("{name} must be finite and non-negative")));
            }
            if w.angle + w.position <= 0.0 {
                return Err(invalid(&format!("{name} needs at least one positive weight")));
            }
        }

        for (name, value) in [
            ("angles.smoothing_alpha", self.angles.smoothing_alpha),
            ("positions.smoothing_alpha", self.positions.smoothing_alpha),
            ("angles.similarity_threshold", self.angles.similarity_threshold),
            ("calibration.min_quality", self.calibration.min_quality),
            ("scoring.accuracy_threshold", self.scoring.accuracy_threshold),
            ("resolver.early_exit_score", self.resolver.early_exit_score),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(invalid(&format!("{name} must be within [0, 1], got {value}")));
            }
        }

        for (name, value) in [
            ("angles.range_deg", self.angles.range_deg),
            ("positions.distance_threshold", self.positions.distance_threshold),
            ("calibration.min_torso_size", self.calibration.min_torso_size),
            ("scoring.combo_seconds", self.scoring.combo_seconds),
            ("reference.window_sec", self.reference.window_sec),
        ] {
            if value.is_nan() || value <= 0.0 {
                return Err(invalid(&format!("{name} must be positive, got {value}")));
            }
        }

        for (name, value) in [
            ("reference.time_tolerance_sec", self.reference.time_tolerance_sec),
            ("scoring.grace_delay_sec", self.scoring.grace_delay_sec),
            ("scoring.points_per_second", self.scoring.points_per_second),
            ("resolver.position_weight", self.resolver.position_weight),
            ("resolver.angle_weight", self.resolver.angle_weight),
            ("resolver.distance_sq_threshold", self.resolver.distance_sq_threshold),
            ("resolver.angle_threshold_deg", self.resolver.angle_threshold_deg),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(&format!("{name} must be finite and non-negative, got {value}")));
            }
        }

        if self.calibration.required_samples == 0 {
            return Err(invalid("calibration.required_samples must be at least 1"));
        }
        let joint_ids = self
            .angles
            .joints
            .iter()
            .flat_map(|j| [j.first, j.vertex, j.second]);
        let mut ids = joint_ids
            .chain(self.positions.landmarks.iter().copied())
            .chain(self.resolver.landmarks.iter().copied());
        if ids.any(|id| id >= LANDMARK_COUNT) {
            return Err(invalid("landmark ids must be below 33"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> Error {
    Error::InvalidConfig(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = MatchConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.angles.smoothing_alpha, 0.4);
        assert_eq!(config.positions.smoothing_alpha, 0.3);
        assert_eq!(config.positions.distance_threshold, 0.15);
        assert_eq!(config.calibration.min_quality, 0.7);
        assert!(config.reference.mirror);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let json = r#"{"weights": {"angle": 1.0}, "scoring": {"max_combo": 5}}"#;
        let config: MatchConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.weights.angle, 1.0);
        assert_eq!(config.weights.position, 0.4);
        assert_eq!(config.calibration_weights.angle, 0.6);
        assert_eq!(config.calibration_weights.position, 0.4);
        assert_eq!(config.scoring.max_combo, 5);
        assert_eq!(config.scoring.accuracy_threshold, 0.6);
        assert_eq!(config.angles.joints.len(), 6);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = MatchConfig::default();
        config.weights = SignalWeights {
            angle: 0.0,
            position: 0.0,
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let mut config = MatchConfig::default();
        config.calibration_weights.position = -0.4;
        assert!(config.validate().is_err());

        let mut config = MatchConfig::default();
        config.angles.smoothing_alpha = 1.5;
        assert!(config.validate().is_err());

        let mut config = MatchConfig::default();
        config.reference.window_sec = -0.1;
        assert!(config.validate().is_err());

        let mut config = MatchConfig::default();
        config.positions.landmarks.push(40);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_checks_thresholds_and_rates() {
        let cases: [fn(&mut MatchConfig); 8] = [
            |c| c.scoring.accuracy_threshold = -0.1,
            |c| c.angles.similarity_threshold = 1.2,
            |c| c.calibration.min_quality = f64::NAN,
            |c| c.resolver.early_exit_score = 1.5,
            |c| c.resolver.position_weight = -1.0,
            |c| c.resolver.angle_weight = f64::INFINITY,
            |c| c.scoring.points_per_second = -10.0,
            |c| c.reference.time_tolerance_sec = f64::NAN,
        ];
        for (i, apply) in cases.iter().enumerate() {
            let mut config = MatchConfig::default();
            apply(&mut config);
            assert!(
                matches!(config.validate(), Err(Error::InvalidConfig(_))),
                "case {i} accepted"
            );
        }

        let mut config = MatchConfig::default();
        config.scoring.accuracy_threshold = 1.0;
        config.calibration.min_quality = 0.0;
        config.scoring.points_per_second = 0.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut config = MatchConfig::default();
        config.scoring.grace_delay_sec = 1.25;
        config.reference.mirror = false;
        config.save(&path).unwrap();

        let loaded = MatchConfig::load(&path).unwrap();
        assert_eq!(loaded.scoring.grace_delay_sec, 1.25);
        assert!(!loaded.reference.mirror);
    }

    #[test]
    fn test_load_or_create_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        assert!(!path.exists());
        let config = MatchConfig::load_or_create(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.scoring.points_per_second, 10.0);
    }
}
