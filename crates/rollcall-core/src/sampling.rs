/// Default admission window: one frame in five is analysed.
pub const DEFAULT_SAMPLE_WINDOW: usize = 5;

/// Counter-based frame admission.
///
/// Of every `window` consecutive frames exactly the first is admitted for
/// matching; the rest are display-only.
#[derive(Debug, Clone)]
pub struct FrameSampler {
    window: u64,
    counter: u64,
}

impl FrameSampler {
    /// A window of 0 is treated as 1 (admit every frame).
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1) as u64,
            counter: 0,
        }
    }

    /// Decide admission for the next frame and advance the counter.
    pub fn admit(&mut self) -> bool {
        let admitted = self.counter % self.window == 0;
        self.counter = self.counter.wrapping_add(1);
        admitted
    }

    /// Frames seen so far.
    pub fn frames_seen(&self) -> u64 {
        self.counter
    }
}

impl Default for FrameSampler {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_WINDOW)
    }
}
