// src/resolver.rs - Picks the reference frame the performer is most likely dancing
use crate::angles::AngleMap;
use crate::landmarks::*;
use crate::track::{ReferenceFrame, TrackIndex};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Reduced landmark set used by the quick position test.
    pub landmarks: Vec<usize>,
    /// A landmark passes when its squared distance is below this.
    pub distance_sq_threshold: f64,
    /// An angle passes when it differs by at most this many degrees.
    pub angle_threshold_deg: f64,
    pub position_weight: f64,
    pub angle_weight: f64,
    /// Stop scanning once a candidate scores at least this.
    pub early_exit_score: f64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            landmarks: vec![
                LEFT_SHOULDER,
                RIGHT_SHOULDER,
                LEFT_WRIST,
                RIGHT_WRIST,
                LEFT_HIP,
                RIGHT_HIP,
                LEFT_ANKLE,
                RIGHT_ANKLE,
            ],
            distance_sq_threshold: 0.15 * 0.15,
            angle_threshold_deg: 20.0,
            position_weight: 0.5,
            angle_weight: 0.5,
            early_exit_score: 0.95,
        }
    }
}

/// Performer data the resolver can compare against.
#[derive(Debug, Clone, Copy)]
pub struct PerformerSample<'a> {
    /// Already projected into reference space.
    pub pose: &'a Pose,
    pub angles: &'a AngleMap,
}

#[derive(Debug, Clone)]
pub struct ReferenceResolver {
    config: ResolverConfig,
    window_sec: f64,
}

impl ReferenceResolver {
    pub fn new(config: ResolverConfig, window_sec: f64) -> Self {
        Self { config, window_sec }
    }

    /// Best reference frame for playback time `now`.
    ///
    /// Without a performer sample, or with nothing in the window, this is
    /// simply the nearest frame by time.
    pub fn resolve<'t>(
        &self,
        index: &'t TrackIndex,
        now: f64,
        performer: Option<PerformerSample<'_>>,
    ) -> Option<&'t ReferenceFrame> {
        let Some(performer) = performer else {
            return index.find_nearest(now);
        };
        let candidates = index.find_window(now, self.window_sec);
        match candidates {
            [] => index.find_nearest(now),
            [only] => Some(only),
            _ => Some(self.best_candidate(candidates, now, performer)),
        }
    }

    fn best_candidate<'t>(
        &self,
        candidates: &'t [ReferenceFrame],
        now: f64,
        performer: PerformerSample<'_>,
    ) -> &'t ReferenceFrame {
        let mut best = &candidates[0];
        let mut best_score = f64::NEG_INFINITY;

        for candidate in candidates {
            let score = self.quick_score(performer, candidate);
            let closer = (candidate.timestamp - now).abs() < (best.timestamp - now).abs();
            if score > best_score || (score == best_score && closer) {
                best = candidate;
                best_score = score;
            }
            if score >= self.config.early_exit_score {
                break;
            }
        }
        best
    }

    /// Cheap similarity in [0, 1] used only for ranking candidates.
    pub fn quick_score(&self, performer: PerformerSample<'_>, candidate: &ReferenceFrame) -> f64 {
        let mut compared = 0usize;
        let mut passed = 0usize;
        for &id in &self.config.landmarks {
            if let (Some(p), Some(r)) = (performer.pose.visible(id), candidate.pose.visible(id)) {
                compared += 1;
                let (dx, dy) = (p.x - r.x, p.y - r.y);
                if dx * dx + dy * dy <= self.config.distance_sq_threshold {
                    passed += 1;
                }
            }
        }
        let position = (compared > 0).then(|| passed as f64 / compared as f64);

        let mut compared = 0usize;
        let mut passed = 0usize;
        for (name, reference) in &candidate.angles {
            let Some(reference) = reference else {
                continue;
            };
            compared += 1;
            if let Some(Some(angle)) = performer.angles.get(name) {
                if (angle - reference).abs() <= self.config.angle_threshold_deg {
                    passed += 1;
                }
            }
        }
        let angle = (compared > 0).then(|| passed as f64 / compared as f64);

        let mut weighted = 0.0;
        let mut weight = 0.0;
        if let Some(position) = position {
            weighted += position * self.config.position_weight;
            weight += self.config.position_weight;
        }
        if let Some(angle) = angle {
            weighted += angle * self.config.angle_weight;
            weight += self.config.angle_weight;
        }
        if weight > 0.0 {
            weighted / weight
        } else {
            0.0
        }
    }
}
