// src/lib.rs
pub mod angles;
pub mod calibration;
pub mod config;
pub mod data;
pub mod error;
pub mod landmarks;
pub mod positions;
pub mod resolver;
pub mod scoring;
pub mod session_task;
pub mod smoothing;
pub mod track;
pub mod tracking;

pub use config::MatchConfig;
pub use error::{Error, Result};
pub use landmarks::{Landmark, Pose};
pub use tracking::{FrameReport, MatchSession, SessionPhase, SessionSummary};
