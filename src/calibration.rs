// src/calibration.rs - Performer-to-reference coordinate fitting
use crate::landmarks::*;
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Compare raw coordinates without fitting a transform.
    pub skip_normalization: bool,
    /// Floor for torso width/height to keep ratios finite.
    pub min_torso_size: f64,
    /// Combined match score a capture sample must reach.
    pub min_quality: f64,
    /// Consecutive qualifying samples needed before fitting.
    pub required_samples: usize,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            skip_normalization: false,
            min_torso_size: 0.01,
            min_quality: 0.7,
            required_samples: 30,
        }
    }
}

/// Uniform scale plus offset mapping performer space onto reference space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationState {
    pub scale_x: f64,
    pub scale_y: f64,
    pub offset_x: f64,
    pub offset_y: f64,
}

impl Default for CalibrationState {
    fn default() -> Self {
        Self::identity()
    }
}

impl CalibrationState {
    pub fn identity() -> Self {
        Self {
            scale_x: 1.0,
            scale_y: 1.0,
            offset_x: 0.0,
            offset_y: 0.0,
        }
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::identity()
    }

    /// Projects a performer pose into reference space. Depth and visibility
    /// pass through unchanged.
    pub fn apply(&self, pose: &Pose) -> Pose {
        if self.is_identity() {
            return pose.clone();
        }
        pose.map_landmarks(|lm| Landmark {
            x: lm.x * self.scale_x + self.offset_x,
            y: lm.y * self.scale_y + self.offset_y,
            ..*lm
        })
    }
}

/// Shoulder/hip box of one pose.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Torso {
    pub width: f64,
    pub height: f64,
    pub center: Vector2<f64>,
}

impl Torso {
    /// `None` when any shoulder or hip is missing or untrustworthy.
    pub fn measure(pose: &Pose, min_size: f64) -> Option<Self> {
        let ls = pose.visible(LEFT_SHOULDER)?;
        let rs = pose.visible(RIGHT_SHOULDER)?;
        let lh = pose.visible(LEFT_HIP)?;
        let rh = pose.visible(RIGHT_HIP)?;

        let shoulder_mid_y = (ls.y + rs.y) / 2.0;
        let hip_mid_y = (lh.y + rh.y) / 2.0;

        Some(Self {
            width: (ls.x - rs.x).abs().max(min_size),
            height: (hip_mid_y - shoulder_mid_y).abs().max(min_size),
            center: Vector2::new(
                (ls.x + rs.x + lh.x + rh.x) / 4.0,
                (ls.y + rs.y + lh.y + rh.y) / 4.0,
            ),
        })
    }
}

/// Fits the performer's torso onto the reference torso.
///
/// Scale is the mean of the width and height ratios, applied to both axes.
/// The offset places the scaled performer centroid on the reference
/// centroid.
pub fn compute_calibration(
    performer: &Pose,
    reference: &Pose,
    min_torso_size: f64,
) -> Option<CalibrationState> {
    let p = Torso::measure(performer, min_torso_size)?;
    let r = Torso::measure(reference, min_torso_size)?;

    let scale = (r.width / p.width + r.height / p.height) / 2.0;
    if !scale.is_finite() || scale <= 0.0 {
        return None;
    }
    let offset = r.center - p.center * scale;

    Some(CalibrationState {
        scale_x: scale,
        scale_y: scale,
        offset_x: offset.x,
        offset_y: offset.y,
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalibrationStatus {
    /// Still collecting qualifying samples.
    Capturing { streak: usize, required: usize },
    /// Enough samples, but the torso could not be measured. Capture restarts.
    Failed,
    Calibrated(CalibrationState),
}

/// Tracks the "hold the pose" capture and owns the resulting transform.
#[derive(Debug, Clone)]
pub struct Calibrator {
    config: CalibrationConfig,
    state: CalibrationState,
    streak: usize,
    calibrated: bool,
}

impl Calibrator {
    pub fn new(config: CalibrationConfig) -> Self {
        Self {
            config,
            state: CalibrationState::identity(),
            streak: 0,
            calibrated: false,
        }
    }

    /// Starts a fresh attempt with the identity transform.
    pub fn begin(&mut self) {
        self.state = CalibrationState::identity();
        self.streak = 0;
        self.calibrated = false;
    }

    /// Feeds one capture sample scored at `quality`.
    ///
    /// A failing sample resets the streak to zero.
    pub fn observe(&mut self, performer: &Pose, reference: &Pose, quality: f64) -> CalibrationStatus {
        if self.calibrated {
            return CalibrationStatus::Calibrated(self.state);
        }

        if quality >= self.config.min_quality {
            self.streak += 1;
        } else {
            self.streak = 0;
        }

        let required = self.config.required_samples.max(1);
        if self.streak < required {
            return CalibrationStatus::Capturing {
                streak: self.streak,
                required,
            };
        }

        if self.config.skip_normalization {
            return self.accept(CalibrationState::identity());
        }

        match compute_calibration(performer, reference, self.config.min_torso_size) {
            Some(state) => self.accept(state),
            None => {
                tracing::warn!("calibration failed: torso landmarks not visible, restarting capture");
                self.streak = 0;
                CalibrationStatus::Failed
            }
        }
    }

    fn accept(&mut self, state: CalibrationState) -> CalibrationStatus {
        tracing::info!(
            scale = state.scale_x,
            offset_x = state.offset_x,
            offset_y = state.offset_y,
            "calibration complete"
        );
        self.state = state;
        self.calibrated = true;
        CalibrationStatus::Calibrated(state)
    }

    pub fn state(&self) -> CalibrationState {
        self.state
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    pub fn streak(&self) -> usize {
        self.streak
    }

    /// Transform for live frames. Identity whenever normalization is off or
    /// calibration has not completed.
    pub fn transform(&self, pose: &Pose) -> Pose {
        if self.config.skip_normalization {
            return pose.clone();
        }
        self.state.apply(pose)
    }
}
