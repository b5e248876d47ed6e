use anyhow::{Context, Result};
use rollcall_core::{AttendancePipeline, GalleryOrigin, GalleryStore, StoreError};
use rollcall_store::{CommandExtractor, FaceStore};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod feed;
mod sinks;

use config::Config;
use dbus_interface::{AttendanceService, StartupInfo, BUS_NAME, OBJECT_PATH};
use feed::DirectoryFeed;
use sinks::{JsonBadgeWriter, TemplateGreeter};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");
    let config = Config::from_env();

    let cmd = config
        .extractor_cmd
        .as_deref()
        .context("ROLLCALL_EXTRACTOR_CMD is not set; frames cannot be analysed")?;
    let mut extractor = CommandExtractor::from_command_line(cmd)
        .context("ROLLCALL_EXTRACTOR_CMD is blank")?
        .with_timeout(config.extractor_timeout);
    tracing::info!(program = extractor.program(), "embedding extractor configured");

    let gallery_store = GalleryStore::new(&config.cache_path);
    let (gallery, origin) = {
        let faces = FaceStore::open(&config.db_path)
            .with_context(|| format!("failed to open enrollment db {}", config.db_path.display()))?;
        match gallery_store.open(&faces, &mut extractor, config.cache_validation) {
            Ok(opened) => (Some(opened.gallery), Some(opened.origin)),
            Err(StoreError::EmptyGallery) => {
                tracing::error!(
                    db = %config.db_path.display(),
                    "gallery is empty; attendance marking disabled (enroll faces and restart)"
                );
                (None, None)
            }
            Err(e) => {
                tracing::error!(error = %e, "gallery unavailable; attendance marking disabled");
                (None, None)
            }
        }
    };
    if origin == Some(GalleryOrigin::Rebuilt) {
        tracing::info!(path = %config.cache_path.display(), "gallery rebuilt from enrollment db");
    }

    let pipeline = AttendancePipeline::new(
        gallery,
        Box::new(extractor),
        Box::new(TemplateGreeter::new(config.greeting_template.clone())),
        Box::new(JsonBadgeWriter),
        config.pipeline_config(),
    );

    let feed = DirectoryFeed::open(&config.frames_dir, config.frame_interval)
        .with_context(|| format!("failed to open frame feed {}", config.frames_dir.display()))?;
    if feed.is_empty() {
        tracing::warn!(dir = %config.frames_dir.display(), "frame feed has no images");
    }

    let (sightings_tx, mut sightings_rx) = tokio::sync::mpsc::unbounded_channel();
    let (engine, engine_thread) = engine::spawn_engine(pipeline, Box::new(feed), sightings_tx)?;

    let info = StartupInfo {
        cache_path: config.cache_path.clone(),
        gallery_origin: origin,
        tolerance: config.tolerance,
        sample_window: config.sample_window,
    };
    let conn = match register_dbus(AttendanceService::new(engine.clone(), info)).await {
        Ok(conn) => {
            tracing::info!(bus_name = BUS_NAME, "D-Bus interface registered");
            Some(conn)
        }
        Err(e) => {
            tracing::warn!(error = %e, "D-Bus unavailable; running without IPC");
            None
        }
    };

    let notifier = tokio::spawn(async move {
        while let Some(sighting) = sightings_rx.recv().await {
            tracing::info!(identity = %sighting.identity, greeting = %sighting.greeting, "greeting");
            if let Some(conn) = &conn {
                if let Err(e) = dbus_interface::emit_face_recognized(conn, &sighting).await {
                    tracing::warn!(identity = %sighting.identity, error = %e, "FaceRecognized signal failed");
                }
            }
        }
    });

    tracing::info!("rollcalld ready");

    // The engine answers between frames, so allow one full extractor run.
    let stop_timeout = config.extractor_timeout + Duration::from_secs(5);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("rollcalld shutting down");
            match tokio::time::timeout(stop_timeout, engine.stop()).await {
                Ok(Ok(snapshot)) => tracing::info!(recorded = snapshot.attendance.len(), "session ended"),
                Ok(Err(e)) => tracing::warn!(error = %e, "engine already stopped"),
                Err(_) => {
                    tracing::error!(?stop_timeout, "engine did not stop in time; exiting without it");
                    return Ok(());
                }
            }
        }
        res = notifier => {
            if let Err(e) = res {
                tracing::error!(error = %e, "notifier task failed");
            }
            // Let an in-flight Stop reply reach the caller.
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    match tokio::task::spawn_blocking(move || engine_thread.join()).await {
        Ok(Ok(())) => {}
        _ => tracing::error!("engine thread panicked"),
    }
    tracing::info!("rollcalld stopped");
    Ok(())
}

async fn register_dbus(service: AttendanceService) -> zbus::Result<zbus::Connection> {
    zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
}
