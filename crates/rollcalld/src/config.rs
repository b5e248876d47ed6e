use rollcall_core::matcher::DEFAULT_TOLERANCE;
use rollcall_core::pipeline::PipelineConfig;
use rollcall_core::sampling::DEFAULT_SAMPLE_WINDOW;
use rollcall_core::CacheValidation;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_EVENT_LABEL: &str = "Annual Conference 2025";
const DEFAULT_GREETING: &str = "Hello {name}, welcome!";
const DEFAULT_EXTRACTOR_TIMEOUT_SECS: u64 = 10;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite enrollment database (`faces` table).
    pub db_path: PathBuf,
    /// Gallery cache artifact.
    pub cache_path: PathBuf,
    /// Directory of frame images, consumed in lexical order.
    pub frames_dir: PathBuf,
    /// External extractor command line (image on stdin, JSON embeddings on stdout).
    pub extractor_cmd: Option<String>,
    /// Per-image deadline for the extractor; a stuck child is killed.
    pub extractor_timeout: Duration,
    /// Maximum Euclidean distance for a positive match.
    pub tolerance: f32,
    /// One frame in this many is analysed.
    pub sample_window: usize,
    /// Event name printed on identity badges.
    pub event_label: String,
    /// Directory badges are written to.
    pub badge_dir: PathBuf,
    /// Greeting template; `{name}` is replaced by the identity.
    pub greeting_template: String,
    pub cache_validation: CacheValidation,
    /// Delay between feed frames.
    pub frame_interval: Duration,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = get("XDG_DATA_HOME")
            .map(|d| PathBuf::from(d).join("rollcall"))
            .unwrap_or_else(rollcall_core::default_data_dir);

        let cache_validation = match get("ROLLCALL_CACHE_VALIDATION") {
            Some(v) => v.parse().unwrap_or_else(|e: String| {
                tracing::warn!(error = %e, "falling back to fingerprint cache validation");
                CacheValidation::Fingerprint
            }),
            None => CacheValidation::default(),
        };

        let sample_window = parsed(&get, "ROLLCALL_SAMPLE_WINDOW", DEFAULT_SAMPLE_WINDOW);
        if sample_window == 0 {
            tracing::warn!("ROLLCALL_SAMPLE_WINDOW=0 treated as 1");
        }

        let tolerance = parsed(&get, "ROLLCALL_TOLERANCE", DEFAULT_TOLERANCE);
        let tolerance = if tolerance.is_finite() && tolerance >= 0.0 {
            tolerance
        } else {
            tracing::warn!(value = tolerance, "ROLLCALL_TOLERANCE must be a non-negative number; using default");
            DEFAULT_TOLERANCE
        };

        let timeout_secs = parsed(
            &get,
            "ROLLCALL_EXTRACTOR_TIMEOUT_SECS",
            DEFAULT_EXTRACTOR_TIMEOUT_SECS,
        );
        if timeout_secs == 0 {
            tracing::warn!("ROLLCALL_EXTRACTOR_TIMEOUT_SECS=0 treated as 1");
        }

        Self {
            db_path: get("ROLLCALL_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("faces.db")),
            cache_path: get("ROLLCALL_CACHE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("encodings.json")),
            frames_dir: get("ROLLCALL_FRAMES_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("frames")),
            extractor_cmd: get("ROLLCALL_EXTRACTOR_CMD").filter(|c| !c.trim().is_empty()),
            extractor_timeout: Duration::from_secs(timeout_secs.max(1)),
            tolerance,
            sample_window: sample_window.max(1),
            event_label: get("ROLLCALL_EVENT_LABEL").unwrap_or_else(|| DEFAULT_EVENT_LABEL.to_string()),
            badge_dir: get("ROLLCALL_BADGE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("badges")),
            greeting_template: get("ROLLCALL_GREETING").unwrap_or_else(|| DEFAULT_GREETING.to_string()),
            cache_validation,
            frame_interval: Duration::from_millis(parsed(&get, "ROLLCALL_FRAME_INTERVAL_MS", 0)),
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            tolerance: self.tolerance,
            sample_window: self.sample_window,
            event_label: self.event_label.clone(),
            document_dir: self.badge_dir.clone(),
        }
    }
}

fn parsed<T: std::str::FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match get(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "unparseable setting; using default");
            default
        }),
        None => default,
    }
}
