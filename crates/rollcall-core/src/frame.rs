//! Frame type handed from the feed to the pipeline.

/// An acquired video frame as encoded image bytes.
#[derive(Clone)]
pub struct Frame {
    /// Encoded image data (JPEG/PNG), passed untouched to the extractor.
    pub data: Vec<u8>,
    /// Acquisition order, starting at 0.
    pub sequence: u64,
}

impl Frame {
    pub fn new(data: Vec<u8>, sequence: u64) -> Self {
        Self { data, sequence }
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.sequence)
            .field("bytes", &self.data.len())
            .finish()
    }
}
