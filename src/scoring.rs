// src/scoring.rs - Time-integrated score, combo and tracking-loss handling
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreConfig {
    /// Fused accuracy needed for time to count as good.
    pub accuracy_threshold: f64,
    /// Points awarded for every whole second of good time.
    pub points_per_second: f64,
    /// Seconds of unbroken good time per combo step.
    pub combo_seconds: f64,
    pub max_combo: u32,
    /// How long a side may lack signal before scoring freezes.
    pub grace_delay_sec: f64,
}

impl Default for ScoreConfig {
    fn default() -> Self {
        Self {
            accuracy_threshold: 0.6,
            points_per_second: 10.0,
            combo_seconds: 1.0,
            max_combo: 99,
            grace_delay_sec: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayState {
    Idle,
    Playing,
    /// Playing, but one or both streams lack usable signal.
    Frozen,
    Ended,
}

/// Whether each stream currently carries enough signal to score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sufficiency {
    pub performer: bool,
    pub reference: bool,
}

impl Sufficiency {
    pub const BOTH: Sufficiency = Sufficiency {
        performer: true,
        reference: true,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackingWarning {
    PerformerLost,
    ReferenceLost,
    BothLost,
}

impl fmt::Display for TrackingWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TrackingWarning::PerformerLost => "Can't see you - step back into the frame",
            TrackingWarning::ReferenceLost => "Reference dancer not visible - scoring paused",
            TrackingWarning::BothLost => "Tracking lost on both you and the reference",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreState {
    pub score: f64,
    pub combo: u32,
    pub current_accuracy: f64,
    pub last_score_time_sec: Option<f64>,
    pub good_time_accum_sec: f64,
    pub good_streak_sec: f64,
    pub stats_max_combo: u32,
    pub stats_accuracy_time_accum: f64,
    pub stats_tracked_time_sec: f64,
}

impl ScoreState {
    /// Time-weighted mean accuracy over scored time.
    pub fn average_accuracy(&self) -> f64 {
        if self.stats_tracked_time_sec > 0.0 {
            self.stats_accuracy_time_accum / self.stats_tracked_time_sec
        } else {
            0.0
        }
    }
}

/// Result of one evaluated instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreUpdate {
    pub state: PlayState,
    pub warning: Option<TrackingWarning>,
    /// Seconds credited this instant; zero when skipped.
    pub dt: f64,
    pub points: f64,
}

pub struct ScoreMachine {
    config: ScoreConfig,
    state: ScoreState,
    play_state: PlayState,
    performer_lost_since: Option<f64>,
    reference_lost_since: Option<f64>,
}

impl ScoreMachine {
    pub fn new(config: ScoreConfig) -> Self {
        Self {
            config,
            state: ScoreState::default(),
            play_state: PlayState::Idle,
            performer_lost_since: None,
            reference_lost_since: None,
        }
    }

    pub fn state(&self) -> &ScoreState {
        &self.state
    }

    pub fn play_state(&self) -> PlayState {
        self.play_state
    }

    pub fn config(&self) -> &ScoreConfig {
        &self.config
    }

    /// Idle/Ended -> Playing. Restarting from Ended clears the previous run.
    pub fn start(&mut self, now: f64) {
        match self.play_state {
            PlayState::Playing | PlayState::Frozen => return,
            PlayState::Ended => self.reset(),
            PlayState::Idle => {}
        }
        self.state.last_score_time_sec = Some(now);
        self.play_state = PlayState::Playing;
        tracing::info!(now, "scoring started");
    }

    pub fn stop(&mut self) {
        if matches!(self.play_state, PlayState::Playing | PlayState::Frozen) {
            self.play_state = PlayState::Ended;
            tracing::info!(
                score = self.state.score,
                max_combo = self.state.stats_max_combo,
                average_accuracy = self.state.average_accuracy(),
                "scoring ended"
            );
        }
    }

    pub fn reset(&mut self) {
        self.state = ScoreState::default();
        self.play_state = PlayState::Idle;
        self.performer_lost_since = None;
        self.reference_lost_since = None;
    }

    /// Integrates one instant at media time `now`.
    pub fn evaluate(&mut self, now: f64, accuracy: f64, sufficiency: Sufficiency) -> ScoreUpdate {
        let mut update = ScoreUpdate {
            state: self.play_state,
            warning: None,
            dt: 0.0,
            points: 0.0,
        };
        if !matches!(self.play_state, PlayState::Playing | PlayState::Frozen) || !now.is_finite() {
            return update;
        }

        update.warning = self.track_loss(now, sufficiency);
        let frozen = update.warning.is_some();
        self.set_frozen(frozen);
        update.state = self.play_state;

        let last = match self.state.last_score_time_sec {
            Some(last) if now >= last => last,
            _ => {
                // first instant, or a seek backward: resync without scoring
                self.state.last_score_time_sec = Some(now);
                return update;
            }
        };
        self.state.last_score_time_sec = Some(now);
        if frozen {
            return update;
        }

        let dt = now - last;
        let accuracy = if accuracy.is_finite() { accuracy.clamp(0.0, 1.0) } else { 0.0 };
        let state = &mut self.state;
        state.current_accuracy = accuracy;
        state.stats_tracked_time_sec += dt;
        state.stats_accuracy_time_accum += accuracy * dt;
        update.dt = dt;

        if accuracy >= self.config.accuracy_threshold {
            state.good_time_accum_sec += dt;
            while state.good_time_accum_sec >= 1.0 {
                state.good_time_accum_sec -= 1.0;
                state.score += self.config.points_per_second;
                update.points += self.config.points_per_second;
            }
            state.good_streak_sec += dt;
            let steps = if self.config.combo_seconds > 0.0 {
                (state.good_streak_sec / self.config.combo_seconds).floor()
            } else {
                f64::from(self.config.max_combo)
            };
            state.combo = (steps.min(f64::from(self.config.max_combo))) as u32;
            state.stats_max_combo = state.stats_max_combo.max(state.combo);
        } else {
            state.good_time_accum_sec = 0.0;
            state.good_streak_sec = 0.0;
            state.combo = 0;
        }
        update
    }

    /// Updates the per-side "lost since" clocks and reports a warning once
    /// either side has been lost for longer than the grace delay.
    fn track_loss(&mut self, now: f64, sufficiency: Sufficiency) -> Option<TrackingWarning> {
        let grace = self.config.grace_delay_sec;
        let performer = lost_past_grace(&mut self.performer_lost_since, sufficiency.performer, now, grace);
        let reference = lost_past_grace(&mut self.reference_lost_since, sufficiency.reference, now, grace);
        match (performer, reference) {
            (true, true) => Some(TrackingWarning::BothLost),
            (true, false) => Some(TrackingWarning::PerformerLost),
            (false, true) => Some(TrackingWarning::ReferenceLost),
            (false, false) => None,
        }
    }

    fn set_frozen(&mut self, frozen: bool) {
        match (self.play_state, frozen) {
            (PlayState::Playing, true) => {
                tracing::warn!("scoring frozen: insufficient tracking");
                self.play_state = PlayState::Frozen;
            }
            (PlayState::Frozen, false) => {
                tracing::info!("tracking restored, scoring resumed");
                self.play_state = PlayState::Playing;
            }
            _ => {}
        }
    }
}

fn lost_past_grace(since: &mut Option<f64>, sufficient: bool, now: f64, grace: f64) -> bool {
    if sufficient {
        *since = None;
        return false;
    }
    let start = match *since {
        Some(start) if start <= now => start,
        _ => now,
    };
    *since = Some(start);
    now - start >= grace
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const LOST_PERFORMER: Sufficiency = Sufficiency {
        performer: false,
        reference: true,
    };

    fn machine() -> ScoreMachine {
        let mut m = ScoreMachine::new(ScoreConfig {
            max_combo: 3,
            ..ScoreConfig::default()
        });
        m.start(0.0);
        m
    }

    /// Feeds `accuracy` in steps of `step` from `from` up to `to`.
    fn run(m: &mut ScoreMachine, from: f64, to: f64, step: f64, accuracy: f64, s: Sufficiency) {
        let mut t = from;
        while t <= to + 1e-9 {
            m.evaluate(t, accuracy, s);
            t += step;
        }
    }

    #[test]
    fn test_idle_ignores_frames() {
        let mut m = ScoreMachine::new(ScoreConfig::default());
        let update = m.evaluate(1.0, 1.0, Sufficiency::BOTH);
        assert_eq!(update.state, PlayState::Idle);
        assert_eq!(m.state().score, 0.0);
    }

    #[test]
    fn test_points_awarded_per_good_second() {
        let mut m = machine();
        run(&mut m, 0.25, 2.5, 0.25, 1.0, Sufficiency::BOTH);
        assert_eq!(m.state().score, 20.0);
        assert_abs_diff_eq!(m.state().good_time_accum_sec, 0.5, epsilon = 1e-9);
        assert_eq!(m.state().combo, 2);
    }

    #[test]
    fn test_combo_monotonic_and_capped() {
        let mut m = machine();
        let mut previous = 0;
        let mut t = 0.125;
        while t <= 6.0 {
            m.evaluate(t, 0.9, Sufficiency::BOTH);
            assert!(m.state().combo >= previous);
            assert!(m.state().combo <= 3);
            previous = m.state().combo;
            t += 0.125;
        }
        assert_eq!(m.state().combo, 3);
        assert_eq!(m.state().stats_max_combo, 3);
    }

    #[test]
    fn test_miss_resets_combo_and_accumulators() {
        let mut m = machine();
        run(&mut m, 0.5, 2.5, 0.5, 1.0, Sufficiency::BOTH);
        assert_eq!(m.state().combo, 2);
        m.evaluate(2.75, 0.1, Sufficiency::BOTH);
        assert_eq!(m.state().combo, 0);
        assert_eq!(m.state().good_streak_sec, 0.0);
        assert_eq!(m.state().good_time_accum_sec, 0.0);
        assert_eq!(m.state().stats_max_combo, 2);
    }

    #[test]
    fn test_accuracy_integral_ignores_threshold() {
        let mut m = machine();
        m.evaluate(1.0, 0.2, Sufficiency::BOTH);
        m.evaluate(2.0, 1.0, Sufficiency::BOTH);
        assert_abs_diff_eq!(m.state().stats_accuracy_time_accum, 1.2, epsilon = 1e-9);
        assert_abs_diff_eq!(m.state().average_accuracy(), 0.6, epsilon = 1e-9);
    }

    #[test]
    fn test_seek_backward_resyncs_without_scoring() {
        let mut m = machine();
        m.evaluate(5.0, 1.0, Sufficiency::BOTH);
        let before = m.state().clone();
        let update = m.evaluate(4.9, 1.0, Sufficiency::BOTH);
        assert_eq!(update.dt, 0.0);
        assert_eq!(m.state().last_score_time_sec, Some(4.9));
        assert_eq!(m.state().score, before.score);
        assert_eq!(m.state().stats_tracked_time_sec, before.stats_tracked_time_sec);
        assert_eq!(m.state().good_streak_sec, before.good_streak_sec);
    }

    #[test]
    fn test_short_dropout_within_grace_keeps_scoring() {
        let mut m = machine();
        m.evaluate(0.5, 1.0, Sufficiency::BOTH);
        let update = m.evaluate(0.75, 1.0, LOST_PERFORMER);
        assert_eq!(update.state, PlayState::Playing);
        assert!(update.warning.is_none());
        assert!(update.dt > 0.0);
    }

    #[test]
    fn test_missed_frame_within_grace_breaks_combo() {
        let mut m = machine();
        run(&mut m, 0.5, 2.5, 0.5, 1.0, Sufficiency::BOTH);
        assert_eq!(m.state().combo, 2);
        let update = m.evaluate(2.75, 0.0, LOST_PERFORMER);
        assert_eq!(update.state, PlayState::Playing);
        assert!(update.warning.is_none());
        assert_eq!(m.state().combo, 0);
        assert_eq!(m.state().score, 20.0);
        assert_eq!(m.state().stats_max_combo, 2);
    }

    #[test]
    fn test_freeze_preserves_progress_and_resumes_cleanly() {
        let mut m = machine();
        run(&mut m, 0.5, 1.5, 0.5, 1.0, Sufficiency::BOTH);
        // lost, but still inside the grace delay
        m.evaluate(2.0, 1.0, LOST_PERFORMER);
        let before = m.state().clone();
        assert_eq!(before.combo, 2);

        let update = m.evaluate(3.0, 0.0, LOST_PERFORMER);
        assert_eq!(update.state, PlayState::Frozen);
        assert_eq!(update.warning, Some(TrackingWarning::PerformerLost));
        let update = m.evaluate(10.0, 0.0, LOST_PERFORMER);
        assert_eq!(update.dt, 0.0);
        assert_eq!(m.state().score, before.score);
        assert_eq!(m.state().combo, before.combo);
        assert_eq!(m.state().good_streak_sec, before.good_streak_sec);
        assert_eq!(m.state().good_time_accum_sec, before.good_time_accum_sec);
        assert_eq!(m.state().last_score_time_sec, Some(10.0));

        let update = m.evaluate(10.5, 1.0, Sufficiency::BOTH);
        assert_eq!(update.state, PlayState::Playing);
        assert!(update.warning.is_none());
        assert_abs_diff_eq!(update.dt, 0.5, epsilon = 1e-9);
        assert_abs_diff_eq!(m.state().stats_tracked_time_sec, 2.5, epsilon = 1e-9);
        assert_abs_diff_eq!(m.state().good_streak_sec, 2.5, epsilon = 1e-9);
    }

    #[test]
    fn test_both_sides_lost_warning() {
        let mut m = machine();
        let none = Sufficiency {
            performer: false,
            reference: false,
        };
        m.evaluate(1.0, 0.0, none);
        let update = m.evaluate(2.0, 0.0, none);
        assert_eq!(update.warning, Some(TrackingWarning::BothLost));
        assert!(!update.warning.unwrap().to_string().is_empty());
    }

    #[test]
    fn test_reference_loss_tracked_independently() {
        let mut m = machine();
        let ref_lost = Sufficiency {
            performer: true,
            reference: false,
        };
        m.evaluate(1.0, 0.0, ref_lost);
        m.evaluate(1.4, 0.0, LOST_PERFORMER);
        // reference recovered at 1.4; performer clock only just started
        let update = m.evaluate(1.6, 0.0, LOST_PERFORMER);
        assert!(update.warning.is_none());
        let update = m.evaluate(2.0, 0.0, LOST_PERFORMER);
        assert_eq!(update.warning, Some(TrackingWarning::PerformerLost));
    }

    #[test]
    fn test_stop_and_restart() {
        let mut m = machine();
        run(&mut m, 0.5, 2.0, 0.5, 1.0, Sufficiency::BOTH);
        m.stop();
        assert_eq!(m.play_state(), PlayState::Ended);
        let update = m.evaluate(3.0, 1.0, Sufficiency::BOTH);
        assert_eq!(update.state, PlayState::Ended);
        m.start(0.0);
        assert_eq!(m.play_state(), PlayState::Playing);
        assert_eq!(m.state().score, 0.0);
    }
}
