// src/session_task.rs - Runs a MatchSession on its own tokio task
use crate::calibration::CalibrationStatus;
use crate::error::{Error, Result};
use crate::landmarks::Pose;
use crate::tracking::{FrameReport, MatchSession, SessionPhase, SessionSummary};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

const COMMAND_BUFFER: usize = 32;

enum Command {
    BeginCalibration {
        reply: oneshot::Sender<SessionPhase>,
    },
    Calibrate {
        performer: Option<Pose>,
        reference_time: f64,
        reply: oneshot::Sender<CalibrationStatus>,
    },
    Start {
        now: f64,
        reply: oneshot::Sender<SessionPhase>,
    },
    Frame {
        now: f64,
        performer: Option<Pose>,
        reply: oneshot::Sender<FrameReport>,
    },
    Stop {
        reply: oneshot::Sender<SessionPhase>,
    },
    Reset {
        reply: oneshot::Sender<SessionPhase>,
    },
    Summary {
        reply: oneshot::Sender<SessionSummary>,
    },
}

/// Cloneable front end to a session task. Commands are applied one at a
/// time in send order.
#[derive(Clone)]
pub struct SessionHandle {
    sender: mpsc::Sender<Command>,
}

/// Moves `session` onto a new task. The task exits once every handle is
/// dropped and yields the session back through the join handle.
pub fn spawn(session: MatchSession) -> (SessionHandle, JoinHandle<MatchSession>) {
    let (sender, receiver) = mpsc::channel(COMMAND_BUFFER);
    let task = tokio::spawn(run(session, receiver));
    (SessionHandle { sender }, task)
}

async fn run(mut session: MatchSession, mut receiver: mpsc::Receiver<Command>) -> MatchSession {
    info!(frames = session.track().len(), "session task started");

    while let Some(command) = receiver.recv().await {
        // a dropped reply receiver only means the caller stopped waiting
        match command {
            Command::BeginCalibration { reply } => {
                session.begin_calibration();
                let _ = reply.send(session.phase());
            }
            Command::Calibrate {
                performer,
                reference_time,
                reply,
            } => {
                let _ = reply.send(session.calibrate(performer.as_ref(), reference_time));
            }
            Command::Start { now, reply } => {
                session.start(now);
                let _ = reply.send(session.phase());
            }
            Command::Frame {
                now,
                performer,
                reply,
            } => {
                let report = session.process_frame(now, performer.as_ref());
                let _ = reply.send(report);
            }
            Command::Stop { reply } => {
                session.stop();
                let _ = reply.send(session.phase());
            }
            Command::Reset { reply } => {
                session.reset();
                let _ = reply.send(session.phase());
            }
            Command::Summary { reply } => {
                let _ = reply.send(session.summary());
            }
        }
    }

    debug!("all session handles dropped");
    info!(score = session.summary().score, "session task finished");
    session
}

impl SessionHandle {
    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(build(reply))
            .await
            .map_err(|_| Error::SessionClosed)?;
        response.await.map_err(|_| Error::SessionClosed)
    }

    pub async fn begin_calibration(&self) -> Result<SessionPhase> {
        self.request(|reply| Command::BeginCalibration { reply }).await
    }

    pub async fn calibrate(&self, performer: Option<Pose>, reference_time: f64) -> Result<CalibrationStatus> {
        self.request(|reply| Command::Calibrate {
            performer,
            reference_time,
            reply,
        })
        .await
    }

    pub async fn start(&self, now: f64) -> Result<SessionPhase> {
        self.request(|reply| Command::Start { now, reply }).await
    }

    pub async fn process_frame(&self, now: f64, performer: Option<Pose>) -> Result<FrameReport> {
        self.request(|reply| Command::Frame {
            now,
            performer,
            reply,
        })
        .await
    }

    pub async fn stop(&self) -> Result<SessionPhase> {
        self.request(|reply| Command::Stop { reply }).await
    }

    pub async fn reset(&self) -> Result<SessionPhase> {
        self.request(|reply| Command::Reset { reply }).await
    }

    pub async fn summary(&self) -> Result<SessionSummary> {
        self.request(|reply| Command::Summary { reply }).await
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
