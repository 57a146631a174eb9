// src/track.rs - Reference choreography track and its time index
use crate::angles::{compute_angles, present_count, AngleMap, JointTriple};
use crate::error::{Error, Result};
use crate::landmarks::{LandmarkRecord, Pose};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::collections::BTreeMap;
use std::path::Path;

/// Entries scanned around the previous hit before giving up on the hint.
const HINT_SPAN: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceConfig {
    /// Largest gap between playback time and the nearest entry.
    pub time_tolerance_sec: f64,
    /// Half-width of the candidate window around playback time.
    pub window_sec: f64,
    /// Mirror the track at load time to face the performer.
    pub mirror: bool,
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            time_tolerance_sec: 0.5,
            window_sec: 0.25,
            mirror: true,
        }
    }
}

// Wire format of a choreography document.

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub source_url: String,
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub fps: f64,
    #[serde(default)]
    pub resolution: Option<(u32, u32)>,
    #[serde(default)]
    pub total_frames: u64,
    #[serde(default)]
    pub processed_at: Option<String>,
    #[serde(default)]
    pub processing_params: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackEntryRecord {
    pub timestamp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame: Option<u64>,
    pub landmarks: Vec<LandmarkRecord>,
    #[serde(default)]
    pub angles: BTreeMap<String, Option<f64>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackDocument {
    #[serde(default)]
    pub metadata: Option<TrackMetadata>,
    pub poses: Vec<TrackEntryRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<serde_json::Value>,
}

impl TrackDocument {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }
}

/// One reference instant in canonical form.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceFrame {
    pub timestamp: f64,
    pub pose: Pose,
    pub angles: AngleMap,
}

impl ReferenceFrame {
    pub fn new(timestamp: f64, pose: Pose, angles: AngleMap) -> Self {
        Self {
            timestamp,
            pose,
            angles,
        }
    }
}

/// Time-sorted reference frames with windowed lookup.
///
/// Read-only after construction apart from the search hint, which remembers
/// where the previous window started so forward playback stays close to
/// constant time.
#[derive(Debug)]
pub struct TrackIndex {
    frames: Vec<ReferenceFrame>,
    tolerance: f64,
    metadata: Option<TrackMetadata>,
    hint: Cell<usize>,
    last_query: Cell<Option<f64>>,
}

impl TrackIndex {
    /// Fails if any timestamp is non-finite or out of order.
    pub fn new(frames: Vec<ReferenceFrame>, tolerance: f64) -> Result<Self> {
        let mut previous: Option<f64> = None;
        for (index, frame) in frames.iter().enumerate() {
            if !frame.timestamp.is_finite() {
                return Err(Error::InvalidTimestamp { index });
            }
            if let Some(previous) = previous {
                if frame.timestamp < previous {
                    return Err(Error::UnsortedTrack {
                        index,
                        timestamp: frame.timestamp,
                        previous,
                    });
                }
            }
            previous = Some(frame.timestamp);
        }

        Ok(Self {
            frames,
            tolerance: tolerance.max(0.0),
            metadata: None,
            hint: Cell::new(0),
            last_query: Cell::new(None),
        })
    }

    /// Builds the index from a decoded document.
    ///
    /// Entries without stored angles get them computed from their landmarks.
    /// Mirroring flips landmarks and swaps left/right angle names so both
    /// stay consistent.
    pub fn from_document(
        document: TrackDocument,
        joints: &[JointTriple],
        use_depth: bool,
        config: &ReferenceConfig,
    ) -> Result<Self> {
        let mut backfilled = 0usize;
        let frames = document
            .poses
            .into_iter()
            .map(|entry| {
                let mut pose = Pose::from_sparse(&entry.landmarks);
                let mut angles: AngleMap = entry.angles;
                if config.mirror {
                    pose = pose.mirrored();
                    angles = mirror_angle_names(angles);
                }
                if present_count(&angles) == 0 {
                    angles = compute_angles(&pose, joints, use_depth);
                    backfilled += 1;
                }
                ReferenceFrame::new(entry.timestamp, pose, angles)
            })
            .collect();

        let mut index = Self::new(frames, config.time_tolerance_sec)?;
        index.metadata = document.metadata;
        tracing::info!(
            frames = index.len(),
            duration = index.duration(),
            backfilled,
            mirrored = config.mirror,
            "reference track loaded"
        );
        Ok(index)
    }

    pub fn load(
        path: impl AsRef<Path>,
        joints: &[JointTriple],
        use_depth: bool,
        config: &ReferenceConfig,
    ) -> Result<Self> {
        Self::from_document(TrackDocument::load(path)?, joints, use_depth, config)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> &[ReferenceFrame] {
        &self.frames
    }

    pub fn metadata(&self) -> Option<&TrackMetadata> {
        self.metadata.as_ref()
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Timestamp of the last entry, 0 for an empty track.
    pub fn duration(&self) -> f64 {
        self.frames.last().map_or(0.0, |f| f.timestamp)
    }

    /// Closest entry by timestamp, or `None` when it lies beyond tolerance.
    pub fn find_nearest(&self, t: f64) -> Option<&ReferenceFrame> {
        if self.frames.is_empty() || !t.is_finite() {
            return None;
        }
        let idx = self.lower_bound(t, self.tolerance, |ts| ts < t);
        let after = self.frames.get(idx);
        let before = idx.checked_sub(1).and_then(|i| self.frames.get(i));
        let nearest = match (before, after) {
            (Some(b), Some(a)) => {
                if (t - b.timestamp).abs() <= (a.timestamp - t).abs() {
                    b
                } else {
                    a
                }
            }
            (Some(b), None) => b,
            (None, Some(a)) => a,
            (None, None) => return None,
        };
        ((nearest.timestamp - t).abs() <= self.tolerance).then_some(nearest)
    }

    /// All entries with `|timestamp - t| <= w`, ascending.
    pub fn find_window(&self, t: f64, w: f64) -> &[ReferenceFrame] {
        if self.frames.is_empty() || !t.is_finite() || w.is_nan() || w < 0.0 {
            return &[];
        }
        let start = self.lower_bound(t, w, |ts| t - ts > w);
        let end = start
            + self.frames[start..]
                .iter()
                .take_while(|f| f.timestamp - t <= w)
                .count();
        self.hint.set(start);
        self.last_query.set(Some(t));
        &self.frames[start..end]
    }

    /// First index whose timestamp is not `before`. `before` must hold for a
    /// prefix of the track and fail for the rest.
    ///
    /// When `t` is within `2w` of the previous query the search is bracketed
    /// around the previous start; the bracket is verified before use and a
    /// full binary search runs otherwise.
    fn lower_bound(&self, t: f64, w: f64, before: impl Fn(f64) -> bool) -> usize {
        let len = self.frames.len();
        let (mut lo, mut hi) = (0, len);

        if let Some(previous) = self.last_query.get() {
            if (t - previous).abs() <= 2.0 * w {
                let hint = self.hint.get().min(len);
                let (blo, bhi) = if t >= previous {
                    (hint, (hint + HINT_SPAN).min(len))
                } else {
                    (hint.saturating_sub(HINT_SPAN), hint)
                };
                let lower_ok = blo == 0 || before(self.frames[blo - 1].timestamp);
                let upper_ok = bhi == len || !before(self.frames[bhi].timestamp);
                if lower_ok && upper_ok {
                    lo = blo;
                    hi = bhi;
                }
            }
        }

        lo + self.frames[lo..hi].partition_point(|f| before(f.timestamp))
    }
}

fn mirror_angle_names(angles: AngleMap) -> AngleMap {
    angles
        .into_iter()
        .map(|(name, value)| {
            let swapped = if let Some(rest) = name.strip_prefix("left_") {
                format!("right_{rest}")
            } else if let Some(rest) = name.strip_prefix("right_") {
                format!("left_{rest}")
            } else {
                name
            };
            (swapped, value)
        })
        .collect()
}
