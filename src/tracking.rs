// src/tracking.rs - Per-session matching pipeline
use crate::angles::{compare_angles, compute_angles, present_count, AngleComparison, AngleMap};
use crate::calibration::{CalibrationState, CalibrationStatus, Calibrator};
use crate::config::{MatchConfig, SignalWeights};
use crate::error::Result;
use crate::landmarks::Pose;
use crate::positions::{compare_positions, visible_active_count, PositionComparison};
use crate::resolver::{PerformerSample, ReferenceResolver};
use crate::scoring::{PlayState, ScoreMachine, Sufficiency};
use crate::smoothing::Smoother;
use crate::track::{ReferenceFrame, TrackIndex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionPhase {
    Idle,
    Calibrating,
    Playing,
    Frozen,
    Ended,
}

/// Everything the UI layer needs for one evaluated instant.
#[derive(Debug, Clone, Serialize)]
pub struct FrameReport {
    pub time: f64,
    pub phase: SessionPhase,
    pub score: f64,
    pub combo: u32,
    /// Fused accuracy of this instant.
    pub accuracy: f64,
    pub reference_timestamp: Option<f64>,
    /// `None` marks a joint that was not compared this instant.
    pub joint_matches: BTreeMap<String, Option<bool>>,
    pub landmark_matches: BTreeMap<usize, Option<bool>>,
    pub warning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub score: f64,
    pub max_combo: u32,
    pub average_accuracy: f64,
    pub tracked_seconds: f64,
    pub frames_evaluated: u64,
    pub calibrated: bool,
    pub calibration: CalibrationState,
}

/// Owns all mutable matching state for one performer against one track.
pub struct MatchSession {
    config: MatchConfig,
    track: TrackIndex,
    resolver: ReferenceResolver,
    calibrator: Calibrator,
    angle_history: Smoother<String>,
    position_history: Smoother<usize>,
    scorer: ScoreMachine,
    calibrating: bool,
    frames_evaluated: u64,
}

struct Comparison {
    angles: Option<AngleComparison>,
    positions: Option<PositionComparison>,
    accuracy: f64,
}

impl MatchSession {
    pub fn new(config: MatchConfig, track: TrackIndex) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            resolver: ReferenceResolver::new(config.resolver.clone(), config.reference.window_sec),
            calibrator: Calibrator::new(config.calibration.clone()),
            angle_history: Smoother::new(config.angles.smoothing_alpha),
            position_history: Smoother::new(config.positions.smoothing_alpha),
            scorer: ScoreMachine::new(config.scoring.clone()),
            calibrating: false,
            frames_evaluated: 0,
            config,
            track,
        })
    }

    /// Loads the choreography at `path` using this configuration.
    pub fn load(config: MatchConfig, path: impl AsRef<Path>) -> Result<Self> {
        let track = TrackIndex::load(
            path,
            &config.angles.joints,
            config.angles.use_depth,
            &config.reference,
        )?;
        Self::new(config, track)
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    pub fn track(&self) -> &TrackIndex {
        &self.track
    }

    pub fn calibration(&self) -> CalibrationState {
        self.calibrator.state()
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibrator.is_calibrated()
    }

    pub fn phase(&self) -> SessionPhase {
        if self.calibrating {
            return SessionPhase::Calibrating;
        }
        match self.scorer.play_state() {
            PlayState::Idle => SessionPhase::Idle,
            PlayState::Playing => SessionPhase::Playing,
            PlayState::Frozen => SessionPhase::Frozen,
            PlayState::Ended => SessionPhase::Ended,
        }
    }

    /// Starts (or restarts) the hold-the-pose capture.
    pub fn begin_calibration(&mut self) {
        self.calibrator.begin();
        self.angle_history.reset();
        self.position_history.reset();
        self.calibrating = true;
        tracing::info!("calibration started");
    }

    /// Feeds one capture sample. The performer holds the pose of the
    /// reference entry nearest `reference_time`. Starts a new capture when
    /// none is running.
    pub fn calibrate(&mut self, performer: Option<&Pose>, reference_time: f64) -> CalibrationStatus {
        if !self.calibrating {
            self.begin_calibration();
        }
        let reference = self.track.find_nearest(reference_time).cloned();
        let status = match (performer, reference) {
            (Some(performer), Some(reference)) => {
                let quality = self.capture_quality(performer, &reference);
                tracing::debug!(quality, streak = self.calibrator.streak(), "calibration sample");
                self.calibrator.observe(performer, &reference.pose, quality)
            }
            _ => {
                let empty = Pose::empty();
                self.calibrator.observe(&empty, &empty, 0.0)
            }
        };
        if let CalibrationStatus::Calibrated(_) = status {
            self.calibrating = false;
            // history was built from untransformed coordinates
            self.angle_history.reset();
            self.position_history.reset();
        }
        status
    }

    /// Fused match quality of a raw capture sample, weighted by
    /// `calibration_weights`.
    fn capture_quality(&mut self, performer: &Pose, reference: &ReferenceFrame) -> f64 {
        let angles = compute_angles(performer, &self.config.angles.joints, self.config.angles.use_depth);
        compare_all(
            &self.config,
            &self.config.calibration_weights,
            Some(performer),
            &angles,
            reference,
            &mut self.angle_history,
            &mut self.position_history,
        )
        .accuracy
    }

    pub fn start(&mut self, now: f64) {
        if self.calibrating {
            tracing::warn!("starting before calibration finished, using current transform");
            self.calibrating = false;
        }
        self.scorer.start(now);
    }

    pub fn stop(&mut self) {
        self.scorer.stop();
    }

    /// Clears score and smoothing state. Calibration is kept.
    pub fn reset(&mut self) {
        self.scorer.reset();
        self.angle_history.reset();
        self.position_history.reset();
        self.calibrating = false;
        self.frames_evaluated = 0;
    }

    /// Evaluates one detector result at media time `now`.
    pub fn process_frame(&mut self, now: f64, performer: Option<&Pose>) -> FrameReport {
        if !matches!(self.phase(), SessionPhase::Playing | SessionPhase::Frozen) {
            return self.report(now, 0.0, None, None, None);
        }
        if !self.track.is_empty() && now > self.track.duration() {
            self.scorer.stop();
            return self.report(now, 0.0, None, None, None);
        }

        let projected = performer.map(|pose| self.calibrator.transform(pose));
        let performer_angles = projected
            .as_ref()
            .map(|pose| compute_angles(pose, &self.config.angles.joints, self.config.angles.use_depth))
            .unwrap_or_default();

        let sample = projected.as_ref().map(|pose| PerformerSample {
            pose,
            angles: &performer_angles,
        });
        let reference = self.resolver.resolve(&self.track, now, sample);

        let comparison = match reference {
            Some(reference) => compare_all(
                &self.config,
                &self.config.weights,
                projected.as_ref(),
                &performer_angles,
                reference,
                &mut self.angle_history,
                &mut self.position_history,
            ),
            None => Comparison {
                angles: None,
                positions: None,
                accuracy: 0.0,
            },
        };

        let sufficiency = Sufficiency {
            performer: projected
                .as_ref()
                .map_or(false, |pose| self.is_sufficient(pose, &performer_angles)),
            reference: reference.map_or(false, |r| self.is_sufficient(&r.pose, &r.angles)),
        };
        let reference_timestamp = reference.map(|r| r.timestamp);

        let update = self.scorer.evaluate(now, comparison.accuracy, sufficiency);
        self.frames_evaluated += 1;
        let warning = update.warning.map(|w| w.to_string());

        self.report(now, comparison.accuracy, reference_timestamp, Some(&comparison), warning)
    }

    fn is_sufficient(&self, pose: &Pose, angles: &AngleMap) -> bool {
        let min = &self.config.sufficiency;
        let by_angles = self.config.weights.angle > 0.0 && present_count(angles) >= min.min_angles;
        let by_positions = self.config.weights.position > 0.0
            && visible_active_count(pose, &self.config.positions) >= min.min_landmarks;
        by_angles || by_positions
    }

    fn report(
        &self,
        now: f64,
        accuracy: f64,
        reference_timestamp: Option<f64>,
        comparison: Option<&Comparison>,
        warning: Option<String>,
    ) -> FrameReport {
        let mut joint_matches: BTreeMap<String, Option<bool>> = self
            .config
            .angles
            .joints
            .iter()
            .map(|j| (j.name.clone(), None))
            .collect();
        let mut landmark_matches: BTreeMap<usize, Option<bool>> =
            self.config.positions.landmarks.iter().map(|&id| (id, None)).collect();

        if let Some(comparison) = comparison {
            if let Some(angles) = &comparison.angles {
                for (name, &matched) in &angles.matches {
                    joint_matches.insert(name.clone(), Some(matched));
                }
            }
            if let Some(positions) = &comparison.positions {
                for (&id, &matched) in &positions.matches {
                    landmark_matches.insert(id, Some(matched));
                }
            }
        }

        let state = self.scorer.state();
        FrameReport {
            time: now,
            phase: self.phase(),
            score: state.score,
            combo: state.combo,
            accuracy,
            reference_timestamp,
            joint_matches,
            landmark_matches,
            warning,
        }
    }

    pub fn summary(&self) -> SessionSummary {
        let state = self.scorer.state();
        SessionSummary {
            score: state.score,
            max_combo: state.stats_max_combo,
            average_accuracy: state.average_accuracy(),
            tracked_seconds: state.stats_tracked_time_sec,
            frames_evaluated: self.frames_evaluated,
            calibrated: self.calibrator.is_calibrated(),
            calibration: self.calibrator.state(),
        }
    }
}

/// Runs the engines enabled in `weights` and fuses their accuracies. Signals
/// with nothing comparable this instant drop out of the average.
fn compare_all(
    config: &MatchConfig,
    weights: &SignalWeights,
    performer: Option<&Pose>,
    performer_angles: &AngleMap,
    reference: &ReferenceFrame,
    angle_history: &mut Smoother<String>,
    position_history: &mut Smoother<usize>,
) -> Comparison {
    let angles = (weights.angle > 0.0)
        .then(|| compare_angles(performer_angles, &reference.angles, angle_history, &config.angles));

    let empty = Pose::empty();
    let positions = (weights.position > 0.0).then(|| {
        compare_positions(
            performer.unwrap_or(&empty),
            &reference.pose,
            position_history,
            &config.positions,
        )
    });

    let mut weighted = 0.0;
    let mut total = 0.0;
    if let Some(a) = angles.as_ref().filter(|a| a.compared() > 0) {
        weighted += a.accuracy * weights.angle;
        total += weights.angle;
    }
    if let Some(p) = positions.as_ref().filter(|p| p.compared() > 0) {
        weighted += p.accuracy * weights.position;
        total += weights.position;
    }
    let accuracy = if total > 0.0 { weighted / total } else { 0.0 };

    Comparison {
        angles,
        positions,
        accuracy,
    }
}
