use crate::engine::{EngineError, EngineHandle};
use rollcall_core::{GalleryOrigin, Sighting};
use std::path::PathBuf;
use zbus::interface;
use zbus::object_server::SignalEmitter;

pub const BUS_NAME: &str = "org.rollcall.Attendance1";
pub const OBJECT_PATH: &str = "/org/rollcall/Attendance1";

/// Static facts about how the daemon started, reported by `Status`.
#[derive(Debug, Clone)]
pub struct StartupInfo {
    pub cache_path: PathBuf,
    pub gallery_origin: Option<GalleryOrigin>,
    pub tolerance: f32,
    pub sample_window: usize,
}

/// D-Bus interface for the Rollcall attendance daemon.
///
/// Bus name: org.rollcall.Attendance1
/// Object path: /org/rollcall/Attendance1
pub struct AttendanceService {
    engine: EngineHandle,
    info: StartupInfo,
}

impl AttendanceService {
    pub fn new(engine: EngineHandle, info: StartupInfo) -> Self {
        Self { engine, info }
    }
}

fn to_fdo(e: EngineError) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(e.to_string())
}

#[interface(name = "org.rollcall.Attendance1")]
impl AttendanceService {
    /// Return daemon and session status as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let snapshot = self.engine.snapshot().await.map_err(to_fdo)?;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "session_id": snapshot.session_id,
            "started_at": snapshot.started_at,
            "mode": snapshot.mode,
            "loop_state": snapshot.loop_state,
            "frames_seen": snapshot.frames_seen,
            "gallery_entries": snapshot.gallery_entries,
            "gallery_origin": self.info.gallery_origin.map(|o| match o {
                GalleryOrigin::Cache => "cache",
                GalleryOrigin::Rebuilt => "rebuilt",
            }),
            "cache_path": self.info.cache_path.display().to_string(),
            "tolerance": self.info.tolerance,
            "sample_window": self.info.sample_window,
            "recorded": snapshot.attendance.len(),
        })
        .to_string())
    }

    /// List this session's attendance records as JSON, in first-sighting order.
    async fn list_attendance(&self) -> zbus::fdo::Result<String> {
        let snapshot = self.engine.snapshot().await.map_err(to_fdo)?;
        serde_json::to_string(&snapshot.attendance)
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Stop the frame loop and end the session.
    async fn stop(&self) -> zbus::fdo::Result<bool> {
        tracing::info!("stop requested over D-Bus");
        let snapshot = self.engine.stop().await.map_err(to_fdo)?;
        tracing::info!(recorded = snapshot.attendance.len(), "session ended");
        Ok(true)
    }

    /// Emitted once per identity per session, on first sighting.
    #[zbus(signal)]
    async fn face_recognized(
        emitter: &SignalEmitter<'_>,
        name: &str,
        greeting: &str,
    ) -> zbus::Result<()>;
}

/// Broadcast a first sighting on the bus.
pub async fn emit_face_recognized(conn: &zbus::Connection, sighting: &Sighting) -> zbus::Result<()> {
    let iface = conn
        .object_server()
        .interface::<_, AttendanceService>(OBJECT_PATH)
        .await?;
    AttendanceService::face_recognized(iface.signal_emitter(), &sighting.identity, &sighting.greeting)
        .await
}
