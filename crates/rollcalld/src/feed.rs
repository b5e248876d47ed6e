//! Frame feed from a directory of still images (e.g. frames dumped by a capture tool).

use rollcall_core::{Frame, FrameSource, SourceError};
use std::path::{Path, PathBuf};
use std::time::Duration;

const FRAME_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

pub struct DirectoryFeed {
    files: Vec<PathBuf>,
    next: usize,
    interval: Duration,
}

impl DirectoryFeed {
    /// List image files in `dir`, sorted by file name.
    pub fn open(dir: &Path, interval: Duration) -> Result<Self, SourceError> {
        if !dir.is_dir() {
            return Err(SourceError::Unavailable(format!(
                "frame directory not found: {}",
                dir.display()
            )));
        }

        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let is_frame = path.is_file()
                && path
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| FRAME_EXTENSIONS.contains(&e.to_lowercase().as_str()));
            if is_frame {
                files.push(path);
            }
        }
        files.sort();

        tracing::info!(dir = %dir.display(), frames = files.len(), "frame feed opened");
        Ok(Self {
            files,
            next: 0,
            interval,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameSource for DirectoryFeed {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        let Some(path) = self.files.get(self.next) else {
            return Ok(None);
        };
        if !self.interval.is_zero() && self.next > 0 {
            std::thread::sleep(self.interval);
        }
        let data = std::fs::read(path)
            .map_err(|e| SourceError::Read(format!("{}: {e}", path.display())))?;
        let frame = Frame::new(data, self.next as u64);
        self.next += 1;
        Ok(Some(frame))
    }
}
