// src/error.rs
use thiserror::Error;

/// Errors raised at construction and I/O boundaries.
///
/// Per-frame engine calls never produce these; they degrade to empty or
/// `None` results instead.
#[derive(Error, Debug)]
pub enum Error {
    #[error("reference track is not sorted: entry {index} at {timestamp}s follows {previous}s")]
    UnsortedTrack {
        index: usize,
        timestamp: f64,
        previous: f64,
    },

    #[error("reference track entry {index} has a non-finite timestamp")]
    InvalidTimestamp { index: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("session task is no longer running")]
    SessionClosed,
}

pub type Result<T> = std::result::Result<T, Error>;
