//! Embedding extraction via an external command.
//!
//! The command receives encoded image bytes on stdin and prints a JSON
//! array of embeddings, one per detected face, on stdout:
//! `[[0.01, -0.12, ...], ...]`. An empty array means no face was found.

use rollcall_core::{Embedding, EmbeddingExtractor, ExtractionError};
use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

pub struct CommandExtractor {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl CommandExtractor {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: None,
        }
    }

    /// Split a whitespace-separated command line. Returns `None` if it is blank.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }

    /// Kill the command if one image takes longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn wait(&self, child: &mut Child) -> Result<ExitStatus, ExtractionError> {
        let Some(timeout) = self.timeout else {
            return Ok(child.wait()?);
        };
        let deadline = Instant::now() + timeout;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) if Instant::now() < deadline => std::thread::sleep(POLL_INTERVAL),
                Ok(None) => {
                    tracing::warn!(program = %self.program, ?timeout, "extractor timed out; killing it");
                    kill(child);
                    return Err(ExtractionError::TimedOut(timeout));
                }
                Err(e) => {
                    kill(child);
                    return Err(e.into());
                }
            }
        }
    }
}

fn kill(child: &mut Child) {
    if let Err(e) = child.kill() {
        tracing::debug!(error = %e, "extractor already exited");
    }
    let _ = child.wait();
}

fn drain<R: Read>(pipe: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        if let Err(e) = pipe.read_to_end(&mut buf) {
            tracing::debug!(error = %e, "extractor pipe read failed");
        }
    }
    buf
}

impl EmbeddingExtractor for CommandExtractor {
    fn extract(&mut self, image: &[u8]) -> Result<Vec<Embedding>, ExtractionError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ExtractionError::Failed(format!("spawn {}: {e}", self.program)))?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        // Each pipe gets its own thread so a child that fills stderr before
        // reading all of stdin cannot stall on us.
        let (status, stdout, stderr) = std::thread::scope(|s| {
            s.spawn(move || {
                if let Some(mut stdin) = stdin {
                    // A child that exits without reading all input closes the pipe;
                    // its exit status reports the real problem.
                    if let Err(e) = stdin.write_all(image) {
                        tracing::debug!(error = %e, "extractor closed stdin early");
                    }
                }
            });
            let out = s.spawn(move || drain(stdout));
            let err = s.spawn(move || drain(stderr));
            let status = self.wait(&mut child);
            (
                status,
                out.join().unwrap_or_default(),
                err.join().unwrap_or_default(),
            )
        });

        let status = status?;
        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr);
            return Err(ExtractionError::Failed(format!(
                "{} exited with {}: {}",
                self.program,
                status,
                stderr.trim()
            )));
        }

        parse_embeddings(&stdout)
    }
}

fn parse_embeddings(stdout: &[u8]) -> Result<Vec<Embedding>, ExtractionError> {
    let faces: Vec<Vec<f32>> =
        serde_json::from_slice(stdout).map_err(|e| ExtractionError::InvalidOutput(e.to_string()))?;
    Ok(faces.into_iter().map(Embedding::new).collect())
}
