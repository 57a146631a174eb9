// src/main.rs
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clone_dance::calibration::CalibrationStatus;
use clone_dance::data::{PerformanceRecording, SessionRecorder};
use clone_dance::session_task;
use clone_dance::{MatchConfig, MatchSession, SessionPhase};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "clone-dance")]
#[command(about = "Pose matching and scoring for Clone Dance")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Score a recorded performance against a choreography track
    Replay {
        /// Choreography JSON
        #[arg(short, long)]
        track: PathBuf,

        /// Recorded performer frames (JSON)
        #[arg(short, long)]
        performance: PathBuf,

        /// Configuration file; defaults are used when omitted
        #[arg(short, long, env = "CLONE_DANCE_CONFIG")]
        config: Option<PathBuf>,

        /// Directory for frames.csv and summary.json
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Export to the default output directory when --output is absent
        #[arg(long)]
        export: bool,

        /// Leading seconds of the recording used for calibration
        #[arg(long, default_value_t = 0.0)]
        calibration_time: f64,
    },
    /// Print the default configuration, or write it to a file
    Config {
        #[arg(short, long)]
        write: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "clone_dance=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match Args::parse().command {
        Command::Replay {
            track,
            performance,
            config,
            output,
            export,
            calibration_time,
        } => {
            let output = output.or_else(|| export.then(SessionRecorder::default_output_dir));
            replay(track, performance, config, output, calibration_time).await
        }
        Command::Config { write } => {
            let config = MatchConfig::default();
            match write {
                Some(path) => {
                    config
                        .save(&path)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    info!("Wrote default configuration to {}", path.display());
                }
                None => println!("{}", serde_json::to_string_pretty(&config)?),
            }
            Ok(())
        }
    }
}

async fn replay(
    track_path: PathBuf,
    performance_path: PathBuf,
    config_path: Option<PathBuf>,
    output: Option<PathBuf>,
    calibration_time: f64,
) -> Result<()> {
    let config = match &config_path {
        Some(path) => MatchConfig::load(path)
            .with_context(|| format!("Failed to load configuration {}", path.display()))?,
        None => MatchConfig::default(),
    };
    let session = MatchSession::load(config, &track_path)
        .with_context(|| format!("Failed to load track {}", track_path.display()))?;
    let recording = PerformanceRecording::load(&performance_path)
        .with_context(|| format!("Failed to load performance {}", performance_path.display()))?;

    let track_name = session.track().metadata().map(|m| m.name.clone());
    let calibration_pose_time = session.track().frames().first().map_or(0.0, |f| f.timestamp);
    info!(
        track = %track_path.display(),
        frames = recording.frames.len(),
        "Starting replay"
    );

    let (handle, task) = session_task::spawn(session);
    let mut recorder = output
        .as_ref()
        .map(|dir| SessionRecorder::new(dir, None));

    let (calibration, play): (Vec<_>, Vec<_>) = recording
        .frames
        .iter()
        .partition(|frame| frame.timestamp < calibration_time);

    if !calibration.is_empty() {
        handle.begin_calibration().await?;
        let mut calibrated = false;
        for frame in &calibration {
            if let CalibrationStatus::Calibrated(_) =
                handle.calibrate(frame.pose(), calibration_pose_time).await?
            {
                calibrated = true;
                break;
            }
        }
        if !calibrated {
            warn!("Calibration did not complete, comparing raw coordinates");
        }
    }

    handle.start(0.0).await?;
    for frame in play {
        let now = frame.timestamp - calibration_time;
        let report = handle.process_frame(now, frame.pose()).await?;
        let ended = report.phase == SessionPhase::Ended;
        if let Some(recorder) = recorder.as_mut() {
            recorder.add_frame(report);
        }
        if ended {
            break;
        }
    }
    handle.stop().await?;
    let summary = handle.summary().await?;
    drop(handle);
    task.await.context("Session task failed")?;

    println!("Score:            {:.0}", summary.score);
    println!("Max combo:        {}", summary.max_combo);
    println!("Average accuracy: {:.1}%", summary.average_accuracy * 100.0);
    println!("Tracked time:     {:.1}s", summary.tracked_seconds);
    println!("Frames evaluated: {}", summary.frames_evaluated);

    if let Some(recorder) = recorder {
        let csv_path = recorder.export_csv().context("Failed to export frame data")?;
        let summary_path = recorder
            .export_summary(&summary, track_name.as_deref())
            .context("Failed to export summary")?;
        info!(
            "Exported {} and {}",
            csv_path.display(),
            summary_path.display()
        );
    }
    Ok(())
}
