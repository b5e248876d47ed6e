//! Deterministic fakes for the injected capabilities.

use crate::capability::{
    DocumentWriter, EmbeddingExtractor, ExtractionError, Greeter, SinkError,
};
use crate::types::Embedding;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Maps image bytes to a fixed list of embeddings. Unknown images fail.
#[derive(Clone, Default)]
pub struct FakeExtractor {
    outputs: HashMap<Vec<u8>, Vec<Embedding>>,
    pub calls: Arc<AtomicUsize>,
}

impl FakeExtractor {
    pub fn with(mut self, image: &[u8], faces: Vec<Vec<f32>>) -> Self {
        self.outputs
            .insert(image.to_vec(), faces.into_iter().map(Embedding::new).collect());
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EmbeddingExtractor for FakeExtractor {
    fn extract(&mut self, image: &[u8]) -> Result<Vec<Embedding>, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outputs
            .get(image)
            .cloned()
            .ok_or_else(|| ExtractionError::Failed(format!("undecodable image ({} bytes)", image.len())))
    }
}

/// Greeter that records each call, optionally failing.
#[derive(Clone, Default)]
pub struct RecordingGreeter {
    pub calls: Arc<Mutex<Vec<String>>>,
    pub fail: bool,
}

impl Greeter for RecordingGreeter {
    fn greet(&self, identity: &str) -> Result<String, SinkError> {
        self.calls.lock().unwrap().push(identity.to_string());
        if self.fail {
            return Err(SinkError::Failed("greeting service down".into()));
        }
        Ok(format!("Good morning, {identity}"))
    }
}

/// Document writer that records each call, optionally failing.
#[derive(Clone, Default)]
pub struct RecordingWriter {
    pub calls: Arc<Mutex<Vec<(String, String, PathBuf)>>>,
    pub fail: bool,
}

impl DocumentWriter for RecordingWriter {
    fn write(&self, identity: &str, event_label: &str, output_path: &Path) -> Result<(), SinkError> {
        self.calls.lock().unwrap().push((
            identity.to_string(),
            event_label.to_string(),
            output_path.to_path_buf(),
        ));
        if self.fail {
            return Err(SinkError::Failed("renderer crashed".into()));
        }
        Ok(())
    }
}
