use chrono::{DateTime, Utc};
use rollcall_core::{AttendancePipeline, AttendanceRecord, FrameSource, Mode, Sighting};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Why the frame loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Running,
    FeedEnded,
    AcquisitionFailed,
}

/// Point-in-time view of the session, answered between frames.
#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub mode: Mode,
    pub loop_state: LoopState,
    pub frames_seen: u64,
    pub gallery_entries: usize,
    pub attendance: Vec<AttendanceRecord>,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Snapshot {
        reply: oneshot::Sender<EngineSnapshot>,
    },
    Stop {
        reply: oneshot::Sender<EngineSnapshot>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    pub async fn snapshot(&self) -> Result<EngineSnapshot, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Snapshot { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Stop the engine. Returns the final snapshot.
    pub async fn stop(&self) -> Result<EngineSnapshot, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Stop { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }
}

struct Engine {
    pipeline: AttendancePipeline,
    feed: Box<dyn FrameSource + Send>,
    sightings: mpsc::UnboundedSender<Sighting>,
    state: LoopState,
}

impl Engine {
    fn snapshot(&self) -> EngineSnapshot {
        let session = self.pipeline.session();
        EngineSnapshot {
            session_id: session.id(),
            started_at: session.started_at(),
            mode: self.pipeline.mode(),
            loop_state: self.state,
            frames_seen: self.pipeline.frames_seen(),
            gallery_entries: self.pipeline.gallery().map_or(0, |g| g.len()),
            attendance: session.records().to_vec(),
        }
    }

    /// Answer a request. Returns false when the engine should stop.
    fn handle(&self, req: EngineRequest) -> bool {
        match req {
            EngineRequest::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
                true
            }
            EngineRequest::Stop { reply } => {
                tracing::info!("stop requested");
                let _ = reply.send(self.snapshot());
                false
            }
        }
    }

    /// Acquire and process one frame. Returns false when the feed is done.
    fn step(&mut self) -> bool {
        let frame = match self.feed.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                tracing::info!(frames = self.pipeline.frames_seen(), "frame feed ended");
                self.state = LoopState::FeedEnded;
                return false;
            }
            Err(e) => {
                tracing::error!(error = %e, "frame acquisition failed; stopping frame loop");
                self.state = LoopState::AcquisitionFailed;
                return false;
            }
        };

        match self.pipeline.process_frame(&frame) {
            Ok(report) => {
                for sighting in report.sightings {
                    // The notifier may be gone during shutdown; attendance is already recorded.
                    let _ = self.sightings.send(sighting);
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "gallery integrity error");
                self.pipeline.disable_matching(&e.to_string());
            }
        }
        true
    }
}

/// Spawn the frame loop on a dedicated OS thread.
///
/// Frames are processed strictly in acquisition order. Requests are
/// answered between frames; once the feed ends the thread keeps serving
/// requests until stopped, so the session stays queryable.
pub fn spawn_engine(
    pipeline: AttendancePipeline,
    feed: Box<dyn FrameSource + Send>,
    sightings: mpsc::UnboundedSender<Sighting>,
) -> Result<(EngineHandle, std::thread::JoinHandle<()>), EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    let mut engine = Engine {
        pipeline,
        feed,
        sightings,
        state: LoopState::Running,
    };

    let join = std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");

            'frames: loop {
                loop {
                    match rx.try_recv() {
                        Ok(req) => {
                            if !engine.handle(req) {
                                break 'frames;
                            }
                        }
                        Err(TryRecvError::Empty) => break,
                        Err(TryRecvError::Disconnected) => break 'frames,
                    }
                }
                if !engine.step() {
                    while let Some(req) = rx.blocking_recv() {
                        if !engine.handle(req) {
                            break;
                        }
                    }
                    break;
                }
            }

            let session = engine.pipeline.session();
            tracing::info!(
                session = %session.id(),
                recorded = session.len(),
                frames = engine.pipeline.frames_seen(),
                "engine thread exiting"
            );
        })?;

    Ok((EngineHandle { tx }, join))
}
