// src/landmarks.rs - Canonical pose representation shared by both streams
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Number of body landmarks produced by the pose detector.
pub const LANDMARK_COUNT: usize = 33;

/// Landmarks below this visibility are treated as absent.
pub const VISIBILITY_THRESHOLD: f64 = 0.5;

pub const NOSE: usize = 0;
pub const LEFT_EYE_INNER: usize = 1;
pub const LEFT_EYE: usize = 2;
pub const LEFT_EYE_OUTER: usize = 3;
pub const RIGHT_EYE_INNER: usize = 4;
pub const RIGHT_EYE: usize = 5;
pub const RIGHT_EYE_OUTER: usize = 6;
pub const LEFT_EAR: usize = 7;
pub const RIGHT_EAR: usize = 8;
pub const MOUTH_LEFT: usize = 9;
pub const MOUTH_RIGHT: usize = 10;
pub const LEFT_SHOULDER: usize = 11;
pub const RIGHT_SHOULDER: usize = 12;
pub const LEFT_ELBOW: usize = 13;
pub const RIGHT_ELBOW: usize = 14;
pub const LEFT_WRIST: usize = 15;
pub const RIGHT_WRIST: usize = 16;
pub const LEFT_PINKY: usize = 17;
pub const RIGHT_PINKY: usize = 18;
pub const LEFT_INDEX: usize = 19;
pub const RIGHT_INDEX: usize = 20;
pub const LEFT_THUMB: usize = 21;
pub const RIGHT_THUMB: usize = 22;
pub const LEFT_HIP: usize = 23;
pub const RIGHT_HIP: usize = 24;
pub const LEFT_KNEE: usize = 25;
pub const RIGHT_KNEE: usize = 26;
pub const LEFT_ANKLE: usize = 27;
pub const RIGHT_ANKLE: usize = 28;
pub const LEFT_HEEL: usize = 29;
pub const RIGHT_HEEL: usize = 30;
pub const LEFT_FOOT_INDEX: usize = 31;
pub const RIGHT_FOOT_INDEX: usize = 32;

/// Left/right counterparts, swapped when mirroring.
pub const MIRROR_PAIRS: [(usize, usize); 16] = [
    (LEFT_EYE_INNER, RIGHT_EYE_INNER),
    (LEFT_EYE, RIGHT_EYE),
    (LEFT_EYE_OUTER, RIGHT_EYE_OUTER),
    (LEFT_EAR, RIGHT_EAR),
    (MOUTH_LEFT, MOUTH_RIGHT),
    (LEFT_SHOULDER, RIGHT_SHOULDER),
    (LEFT_ELBOW, RIGHT_ELBOW),
    (LEFT_WRIST, RIGHT_WRIST),
    (LEFT_PINKY, RIGHT_PINKY),
    (LEFT_INDEX, RIGHT_INDEX),
    (LEFT_THUMB, RIGHT_THUMB),
    (LEFT_HIP, RIGHT_HIP),
    (LEFT_KNEE, RIGHT_KNEE),
    (LEFT_ANKLE, RIGHT_ANKLE),
    (LEFT_HEEL, RIGHT_HEEL),
    (LEFT_FOOT_INDEX, RIGHT_FOOT_INDEX),
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Landmark {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub visibility: f64,
}

impl Landmark {
    pub fn new(x: f64, y: f64, z: f64, visibility: f64) -> Self {
        Self { x, y, z, visibility }
    }

    /// Trustworthy enough to be compared. Non-finite coordinates never are.
    pub fn is_visible(&self) -> bool {
        self.visibility >= VISIBILITY_THRESHOLD
            && self.x.is_finite()
            && self.y.is_finite()
            && self.z.is_finite()
    }

    /// Position as a vector; depth is zeroed unless `use_depth` is set.
    pub fn point(&self, use_depth: bool) -> Vector3<f64> {
        Vector3::new(self.x, self.y, if use_depth { self.z } else { 0.0 })
    }
}

/// One landmark as it appears on the wire.
///
/// The performer stream sends a dense array where the position implies the
/// id; the reference track sends `{id, x, y, z, visibility}` entries. Both
/// decode into this record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LandmarkRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<usize>,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
    #[serde(default = "default_visibility")]
    pub visibility: f64,
}

fn default_visibility() -> f64 {
    1.0
}

impl From<LandmarkRecord> for Landmark {
    fn from(r: LandmarkRecord) -> Self {
        Landmark::new(r.x, r.y, r.z, r.visibility)
    }
}

/// All landmarks for one instant, indexed by id. Missing ids stay `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct Pose {
    landmarks: [Option<Landmark>; LANDMARK_COUNT],
}

impl Default for Pose {
    fn default() -> Self {
        Self::empty()
    }
}

impl Pose {
    pub fn empty() -> Self {
        Self {
            landmarks: [None; LANDMARK_COUNT],
        }
    }

    /// Dense shape: slot `i` is landmark `i`. Extra slots past 33 are ignored.
    pub fn from_dense(points: &[Option<LandmarkRecord>]) -> Self {
        let mut pose = Self::empty();
        for (id, record) in points.iter().enumerate().take(LANDMARK_COUNT) {
            if let Some(record) = record {
                pose.landmarks[id] = Some((*record).into());
            }
        }
        pose
    }

    /// Sparse shape: each record names its id. Records without an id fall
    /// back to their list position; ids outside `0..33` are dropped.
    pub fn from_sparse(records: &[LandmarkRecord]) -> Self {
        let mut pose = Self::empty();
        for (position, record) in records.iter().enumerate() {
            let id = record.id.unwrap_or(position);
            if id < LANDMARK_COUNT {
                pose.landmarks[id] = Some((*record).into());
            } else {
                tracing::debug!(id, "dropping landmark with out-of-range id");
            }
        }
        pose
    }

    pub fn to_sparse(&self) -> Vec<LandmarkRecord> {
        self.iter()
            .map(|(id, lm)| LandmarkRecord {
                id: Some(id),
                x: lm.x,
                y: lm.y,
                z: lm.z,
                visibility: lm.visibility,
            })
            .collect()
    }

    pub fn to_dense(&self) -> Vec<Option<LandmarkRecord>> {
        self.landmarks
            .iter()
            .map(|slot| {
                slot.map(|lm| LandmarkRecord {
                    id: None,
                    x: lm.x,
                    y: lm.y,
                    z: lm.z,
                    visibility: lm.visibility,
                })
            })
            .collect()
    }

    /// Raw landmark, regardless of visibility.
    pub fn get(&self, id: usize) -> Option<&Landmark> {
        self.landmarks.get(id).and_then(|slot| slot.as_ref())
    }

    /// Landmark only if it can be trusted.
    pub fn visible(&self, id: usize) -> Option<&Landmark> {
        self.get(id).filter(|lm| lm.is_visible())
    }

    pub fn set(&mut self, id: usize, landmark: Option<Landmark>) {
        if let Some(slot) = self.landmarks.get_mut(id) {
            *slot = landmark;
        }
    }

    /// Present landmarks in id order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Landmark)> {
        self.landmarks
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| slot.as_ref().map(|lm| (id, lm)))
    }

    pub fn visible_count(&self) -> usize {
        self.landmarks
            .iter()
            .flatten()
            .filter(|lm| lm.is_visible())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.landmarks.iter().all(Option::is_none)
    }

    /// Horizontal flip in normalized image space with left/right ids swapped.
    pub fn mirrored(&self) -> Pose {
        let mut out = Pose::empty();
        for (id, lm) in self.iter() {
            out.landmarks[id] = Some(Landmark { x: 1.0 - lm.x, ..*lm });
        }
        for (left, right) in MIRROR_PAIRS {
            out.landmarks.swap(left, right);
        }
        out
    }

    /// Applies `f` to every present landmark.
    pub fn map_landmarks(&self, mut f: impl FnMut(&Landmark) -> Landmark) -> Pose {
        let mut out = Pose::empty();
        for (id, lm) in self.iter() {
            out.landmarks[id] = Some(f(lm));
        }
        out
    }
}
