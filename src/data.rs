// src/data.rs
use crate::error::Result;
use crate::landmarks::{LandmarkRecord, Pose};
use crate::tracking::{FrameReport, SessionSummary};
use chrono::Local;
use csv::Writer;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, Serialize)]
struct FrameRecord {
    frame: usize,
    time: f64,
    phase: String,
    score: f64,
    combo: u32,
    accuracy: f64,
    reference_timestamp: Option<f64>,

    joints_compared: usize,
    joints_matched: usize,
    landmarks_compared: usize,
    landmarks_matched: usize,

    // ';'-separated joint names
    matched_joints: String,
    missed_joints: String,

    warning: Option<String>,
}

#[derive(Debug, Serialize)]
struct SummaryDocument<'a> {
    session_id: String,
    session_name: &'a str,
    exported_at: String,
    track_name: Option<&'a str>,
    frames_recorded: usize,
    #[serde(flatten)]
    summary: &'a SessionSummary,
}

/// One recorded detector result. `null` or empty landmarks mean no pose.
#[derive(Debug, Clone, Deserialize)]
pub struct PerformanceFrame {
    pub timestamp: f64,
    #[serde(default)]
    pub landmarks: Option<Vec<Option<LandmarkRecord>>>,
}

impl PerformanceFrame {
    pub fn pose(&self) -> Option<Pose> {
        match &self.landmarks {
            Some(points) if !points.is_empty() => Some(Pose::from_dense(points)),
            _ => None,
        }
    }
}

/// A captured performer stream, replayed offline.
#[derive(Debug, Clone, Deserialize)]
pub struct PerformanceRecording {
    pub frames: Vec<PerformanceFrame>,
}

impl PerformanceRecording {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }
}

/// Collects frame reports for one play session and writes them to disk.
pub struct SessionRecorder {
    output_dir: PathBuf,
    session_name: String,
    session_id: Uuid,
    frames: Vec<FrameReport>,
}

impl SessionRecorder {
    pub fn new(output_dir: impl AsRef<Path>, session_name: Option<String>) -> Self {
        let session_name = session_name.unwrap_or_else(|| {
            format!("session_{}", Local::now().format("%Y%m%d_%H%M%S"))
        });

        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
            session_name,
            session_id: Uuid::new_v4(),
            frames: Vec::new(),
        }
    }

    /// Documents/CloneDance, or ./output when no document dir is known.
    pub fn default_output_dir() -> PathBuf {
        directories::UserDirs::new()
            .and_then(|dirs| dirs.document_dir().map(|p| p.join("CloneDance")))
            .unwrap_or_else(|| PathBuf::from("./output"))
    }

    pub fn session_name(&self) -> &str {
        &self.session_name
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn session_dir(&self) -> PathBuf {
        self.output_dir.join(&self.session_name)
    }

    pub fn add_frame(&mut self, report: FrameReport) {
        self.frames.push(report);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn export_csv(&self) -> Result<PathBuf> {
        let csv_path = self.session_dir().join("frames.csv");
        std::fs::create_dir_all(self.session_dir())?;

        let file = File::create(&csv_path)?;
        let mut writer = Writer::from_writer(file);
        for (i, report) in self.frames.iter().enumerate() {
            writer.serialize(create_record(i, report))?;
        }
        writer.flush()?;

        tracing::info!(path = %csv_path.display(), frames = self.frames.len(), "exported frame data");
        Ok(csv_path)
    }

    pub fn export_summary(&self, summary: &SessionSummary, track_name: Option<&str>) -> Result<PathBuf> {
        let summary_path = self.session_dir().join("summary.json");
        std::fs::create_dir_all(self.session_dir())?;

        let document = SummaryDocument {
            session_id: self.session_id.to_string(),
            session_name: &self.session_name,
            exported_at: Local::now().to_rfc3339(),
            track_name,
            frames_recorded: self.frames.len(),
            summary,
        };
        std::fs::write(&summary_path, serde_json::to_string_pretty(&document)?)?;

        tracing::info!(path = %summary_path.display(), "exported session summary");
        Ok(summary_path)
    }
}

fn create_record(frame: usize, report: &FrameReport) -> FrameRecord {
    let mut matched = Vec::new();
    let mut missed = Vec::new();
    for (name, result) in &report.joint_matches {
        match result {
            Some(true) => matched.push(name.as_str()),
            Some(false) => missed.push(name.as_str()),
            None => {}
        }
    }
    let landmarks = report.landmark_matches.values().flatten();
    let landmarks_compared = landmarks.clone().count();
    let landmarks_matched = landmarks.filter(|&&m| m).count();

    FrameRecord {
        frame,
        time: report.time,
        phase: format!("{:?}", report.phase),
        score: report.score,
        combo: report.combo,
        accuracy: report.accuracy,
        reference_timestamp: report.reference_timestamp,
        joints_compared: matched.len() + missed.len(),
        joints_matched: matched.len(),
        landmarks_compared,
        landmarks_matched,
        matched_joints: matched.join(";"),
        missed_joints: missed.join(";"),
        warning: report.warning.clone(),
    }
}
