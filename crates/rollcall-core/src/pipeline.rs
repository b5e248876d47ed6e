//! Per-frame processing: sample, extract, match, dedup, dispatch.

use crate::capability::{fallback_greeting, DocumentWriter, EmbeddingExtractor, Greeter};
use crate::frame::Frame;
use crate::matcher::{EuclideanMatcher, MatchError, MatchResult, Matcher, DEFAULT_TOLERANCE};
use crate::sampling::{FrameSampler, DEFAULT_SAMPLE_WINDOW};
use crate::session::{AttendanceSession, Outcome};
use crate::types::Gallery;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("matching failed on frame {frame}: {source}")]
    Match {
        frame: u64,
        #[source]
        source: MatchError,
    },
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub tolerance: f32,
    pub sample_window: usize,
    /// Event name printed on identity documents.
    pub event_label: String,
    /// Directory identity documents are written to.
    pub document_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            sample_window: DEFAULT_SAMPLE_WINDOW,
            event_label: "Annual Conference 2025".to_string(),
            document_dir: PathBuf::from("."),
        }
    }
}

/// Whether admitted frames are matched at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Matching,
    /// No usable gallery: frames pass through, attendance is never marked.
    DisplayOnly,
}

/// A first sighting and the side effects dispatched for it.
#[derive(Debug, Clone)]
pub struct Sighting {
    pub identity: String,
    pub distance: f32,
    pub first_seen: DateTime<Utc>,
    pub greeting: String,
    /// Path of the written document, `None` if the writer failed.
    pub document: Option<PathBuf>,
}

/// What happened to one frame.
#[derive(Debug, Clone, Default)]
pub struct FrameReport {
    pub sequence: u64,
    pub admitted: bool,
    pub faces: usize,
    pub unmatched: usize,
    pub already_recorded: usize,
    pub sightings: Vec<Sighting>,
}

/// File name for an identity document: spaces to underscores, path separators stripped.
pub fn document_file_name(identity: &str) -> String {
    let stem: String = identity
        .chars()
        .map(|c| match c {
            ' ' | '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect();
    format!("{stem}_badge.json")
}

/// Owns everything one attendance session needs. Driven by a single loop.
pub struct AttendancePipeline<M: Matcher = EuclideanMatcher> {
    gallery: Option<Arc<Gallery>>,
    matcher: M,
    sampler: FrameSampler,
    session: AttendanceSession,
    extractor: Box<dyn EmbeddingExtractor + Send>,
    greeter: Box<dyn Greeter + Send>,
    documents: Box<dyn DocumentWriter + Send>,
    config: PipelineConfig,
}

impl AttendancePipeline<EuclideanMatcher> {
    pub fn new(
        gallery: Option<Gallery>,
        extractor: Box<dyn EmbeddingExtractor + Send>,
        greeter: Box<dyn Greeter + Send>,
        documents: Box<dyn DocumentWriter + Send>,
        config: PipelineConfig,
    ) -> Self {
        Self::with_matcher(EuclideanMatcher, gallery, extractor, greeter, documents, config)
    }
}

impl<M: Matcher> AttendancePipeline<M> {
    /// Build a pipeline. A `None` or empty gallery starts in display-only mode.
    pub fn with_matcher(
        matcher: M,
        gallery: Option<Gallery>,
        extractor: Box<dyn EmbeddingExtractor + Send>,
        greeter: Box<dyn Greeter + Send>,
        documents: Box<dyn DocumentWriter + Send>,
        config: PipelineConfig,
    ) -> Self {
        let gallery = gallery.filter(|g| !g.is_empty()).map(Arc::new);
        let session = AttendanceSession::new();
        match &gallery {
            Some(g) => tracing::info!(
                session = %session.id(),
                entries = g.len(),
                tolerance = config.tolerance,
                sample_window = config.sample_window,
                "attendance session started"
            ),
            None => tracing::error!(
                session = %session.id(),
                "no gallery available; running display-only, attendance will not be marked"
            ),
        }
        Self {
            gallery,
            matcher,
            sampler: FrameSampler::new(config.sample_window),
            session,
            extractor,
            greeter,
            documents,
            config,
        }
    }

    pub fn mode(&self) -> Mode {
        if self.gallery.is_some() {
            Mode::Matching
        } else {
            Mode::DisplayOnly
        }
    }

    pub fn gallery(&self) -> Option<&Gallery> {
        self.gallery.as_deref()
    }

    pub fn session(&self) -> &AttendanceSession {
        &self.session
    }

    pub fn frames_seen(&self) -> u64 {
        self.sampler.frames_seen()
    }

    /// Drop the gallery and continue display-only.
    pub fn disable_matching(&mut self, reason: &str) {
        if self.gallery.take().is_some() {
            tracing::error!(reason, "matching disabled; continuing display-only");
        }
    }

    /// Process one frame in acquisition order.
    ///
    /// Extraction failures are logged and yield an empty report. A matcher
    /// error is a data-integrity defect and is returned to the caller; no
    /// face of that frame is recorded.
    pub fn process_frame(&mut self, frame: &Frame) -> Result<FrameReport, PipelineError> {
        let mut report = FrameReport {
            sequence: frame.sequence,
            ..Default::default()
        };

        if !self.sampler.admit() {
            return Ok(report);
        }
        let Some(gallery) = self.gallery.clone() else {
            return Ok(report);
        };
        report.admitted = true;

        let probes = match self.extractor.extract(&frame.data) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(frame = frame.sequence, error = %e, "frame extraction failed; skipping");
                return Ok(report);
            }
        };
        report.faces = probes.len();

        // Match every face before touching the session, so an integrity
        // error leaves the frame with no recorded or dispatched sightings.
        let results = probes
            .iter()
            .map(|probe| self.matcher.compare(probe, &gallery, self.config.tolerance))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| PipelineError::Match {
                frame: frame.sequence,
                source,
            })?;

        for result in results {
            match result {
                MatchResult::Matched {
                    identity, distance, ..
                } => match self.session.observe(&identity) {
                    Outcome::FirstSighting => {
                        let sighting = self.dispatch(identity, distance);
                        report.sightings.push(sighting);
                    }
                    Outcome::AlreadyRecorded => {
                        tracing::trace!(identity = %identity, "already recorded");
                        report.already_recorded += 1;
                    }
                },
                MatchResult::Unmatched { nearest } => {
                    tracing::debug!(frame = frame.sequence, ?nearest, "unknown face");
                    report.unmatched += 1;
                }
            }
        }

        Ok(report)
    }

    /// Run the first-sighting side effects. Sink failures are logged and
    /// never undo the recorded state.
    fn dispatch(&self, identity: String, distance: f32) -> Sighting {
        let first_seen = self
            .session
            .records()
            .last()
            .map(|r| r.first_seen)
            .unwrap_or_else(Utc::now);

        tracing::info!(
            identity = %identity,
            distance,
            time = %first_seen.format("%H:%M"),
            "marked attendance"
        );

        let greeting = match self.greeter.greet(&identity) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(identity = %identity, error = %e, "greeting failed; using fallback");
                fallback_greeting(&identity)
            }
        };

        let path = self.config.document_dir.join(document_file_name(&identity));
        let document = match self.documents.write(&identity, &self.config.event_label, &path) {
            Ok(()) => {
                tracing::info!(identity = %identity, path = %path.display(), "identity document written");
                Some(path)
            }
            Err(e) => {
                tracing::warn!(identity = %identity, error = %e, "identity document failed");
                None
            }
        };

        Sighting {
            identity,
            distance,
            first_seen,
            greeting,
            document,
        }
    }
}
