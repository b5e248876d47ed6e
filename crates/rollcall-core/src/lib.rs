//! rollcall-core: identity matching and attendance deduplication engine.
//!
//! Matches face embeddings against a cached gallery with a Euclidean
//! nearest-neighbour rule and records each identity's first appearance
//! in a session exactly once.

pub mod capability;
pub mod frame;
pub mod gallery_store;
pub mod matcher;
pub mod pipeline;
pub mod sampling;
pub mod session;
pub mod types;

#[cfg(test)]
mod testing;

pub use capability::{
    DocumentWriter, EmbeddingExtractor, EnrollmentRecord, EnrollmentSource, ExtractionError,
    FrameSource, Greeter, SinkError, SourceError,
};
pub use frame::Frame;
pub use gallery_store::{
    enrollment_fingerprint, CacheError, CacheValidation, GalleryOrigin, GalleryStore, StoreError,
};
pub use matcher::{EuclideanMatcher, MatchError, MatchResult, Matcher};
pub use pipeline::{AttendancePipeline, FrameReport, Mode, PipelineConfig, PipelineError, Sighting};
pub use sampling::FrameSampler;
pub use session::{AttendanceRecord, AttendanceSession, Outcome};
pub use types::{normalize_identity, Embedding, Gallery, GalleryEntry, GalleryError};

use std::path::PathBuf;

/// Per-user data directory: `$XDG_DATA_HOME/rollcall`, falling back to
/// `~/.local/share/rollcall`.
pub fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}
