//! Interfaces to the collaborators the engine treats as black boxes.
//!
//! The enrollment store, the embedding model, the frame feed and the
//! first-sighting sinks are all injected, so the matching and dedup core
//! runs against deterministic fakes in tests.

use crate::frame::Frame;
use crate::types::Embedding;
use std::path::Path;
use thiserror::Error;

/// One enrollment row: an identity label and its raw image bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrollmentRecord {
    pub name: String,
    pub image: Vec<u8>,
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("source unavailable: {0}")]
    Unavailable(String),
    #[error("read failed: {0}")]
    Read(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("extractor failed: {0}")]
    Failed(String),
    #[error("extractor returned invalid output: {0}")]
    InvalidOutput(String),
    #[error("extractor timed out after {0:?}")]
    TimedOut(std::time::Duration),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("sink failed: {0}")]
    Failed(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Authoritative list of enrolled identities and their reference images.
pub trait EnrollmentSource {
    /// All enrollment rows in a stable order.
    fn records(&self) -> Result<Vec<EnrollmentRecord>, SourceError>;
}

/// Face embedding model: zero or more embeddings per image, one per detected face.
pub trait EmbeddingExtractor {
    fn extract(&mut self, image: &[u8]) -> Result<Vec<Embedding>, ExtractionError>;
}

/// Produces the greeting text for a newly recorded identity.
pub trait Greeter {
    fn greet(&self, identity: &str) -> Result<String, SinkError>;
}

/// Renders an identity document for a newly recorded identity.
pub trait DocumentWriter {
    fn write(&self, identity: &str, event_label: &str, output_path: &Path) -> Result<(), SinkError>;
}

/// Source of frames in acquisition order. `Ok(None)` ends the feed.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError>;
}

/// Text used when the greeter is unavailable.
pub fn fallback_greeting(identity: &str) -> String {
    format!("Hello {identity}, welcome!")
}

impl EnrollmentSource for Vec<EnrollmentRecord> {
    fn records(&self) -> Result<Vec<EnrollmentRecord>, SourceError> {
        Ok(self.clone())
    }
}
