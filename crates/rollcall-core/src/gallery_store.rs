//! Gallery cache lifecycle: load, rebuild from enrollment, atomic save.
//!
//! The cache is a derived view of the enrollment source. A missing or
//! unreadable artifact triggers a rebuild. Whether a present cache is
//! checked against the source is an explicit [`CacheValidation`] choice.

use crate::capability::{EmbeddingExtractor, EnrollmentRecord, EnrollmentSource, SourceError};
use crate::types::{Embedding, Gallery};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

const CACHE_FORMAT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("no gallery cache at {0}")]
    Miss(PathBuf),
    #[error("cache io on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt gallery cache at {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("gallery is empty: no enrollment image produced an embedding")]
    EmptyGallery,
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("enrollment source: {0}")]
    Source(#[from] SourceError),
}

/// How a present cache is checked against the enrollment source at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheValidation {
    /// Use the cache as-is; only deleting it forces a rebuild.
    Trust,
    /// Recompute the enrollment fingerprint and rebuild on mismatch.
    #[default]
    Fingerprint,
}

impl FromStr for CacheValidation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "trust" => Ok(Self::Trust),
            "fingerprint" => Ok(Self::Fingerprint),
            other => Err(format!("unknown cache validation mode: {other}")),
        }
    }
}

/// On-disk cache layout: parallel embedding / name sequences plus provenance.
#[derive(Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    created_at: DateTime<Utc>,
    fingerprint: Option<String>,
    embeddings: Vec<Embedding>,
    names: Vec<String>,
}

/// A gallery restored from the cache artifact.
#[derive(Debug, Clone)]
pub struct CachedGallery {
    pub gallery: Gallery,
    pub fingerprint: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Result of rebuilding the gallery from the enrollment source.
#[derive(Debug, Clone)]
pub struct RebuildReport {
    pub gallery: Gallery,
    pub fingerprint: String,
    /// Enrollment rows read from the source.
    pub images: usize,
    /// Rows that produced no usable embedding.
    pub skipped: usize,
}

/// Where the startup gallery came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GalleryOrigin {
    Cache,
    Rebuilt,
}

#[derive(Debug, Clone)]
pub struct OpenedGallery {
    pub gallery: Gallery,
    pub origin: GalleryOrigin,
}

/// SHA-256 over the ordered `(name, image)` enrollment pairs.
pub fn enrollment_fingerprint(records: &[EnrollmentRecord]) -> String {
    let mut hasher = Sha256::new();
    for record in records {
        hasher.update((record.name.len() as u64).to_le_bytes());
        hasher.update(record.name.as_bytes());
        hasher.update((record.image.len() as u64).to_le_bytes());
        hasher.update(&record.image);
    }
    format!("{:x}", hasher.finalize())
}

/// Owns the gallery cache artifact at a fixed path.
#[derive(Debug, Clone)]
pub struct GalleryStore {
    cache_path: PathBuf,
}

impl GalleryStore {
    pub fn new(cache_path: impl Into<PathBuf>) -> Self {
        Self {
            cache_path: cache_path.into(),
        }
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    /// Read the cache artifact. Absence is [`CacheError::Miss`].
    pub fn load(&self) -> Result<CachedGallery, CacheError> {
        let path = &self.cache_path;
        let bytes = match fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CacheError::Miss(path.clone()));
            }
            Err(e) => {
                return Err(CacheError::Io {
                    path: path.clone(),
                    source: e,
                })
            }
        };

        let corrupt = |reason: String| CacheError::Corrupt {
            path: path.clone(),
            reason,
        };

        let file: CacheFile = serde_json::from_slice(&bytes).map_err(|e| corrupt(e.to_string()))?;
        if file.version != CACHE_FORMAT_VERSION {
            return Err(corrupt(format!(
                "unsupported format version {} (expected {CACHE_FORMAT_VERSION})",
                file.version
            )));
        }
        let gallery =
            Gallery::from_parts(file.names, file.embeddings).map_err(|e| corrupt(e.to_string()))?;
        if gallery.is_empty() {
            return Err(corrupt("cache holds no entries".into()));
        }

        tracing::info!(
            path = %path.display(),
            entries = gallery.len(),
            "gallery loaded from cache"
        );

        Ok(CachedGallery {
            gallery,
            fingerprint: file.fingerprint,
            created_at: file.created_at,
        })
    }

    /// Persist the gallery. Writes a sibling temp file and renames it into
    /// place, so a crash mid-write never leaves a partial artifact at the cache path.
    pub fn save(&self, gallery: &Gallery, fingerprint: Option<&str>) -> Result<(), CacheError> {
        let path = &self.cache_path;
        let io_err = |source: std::io::Error| CacheError::Io {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let (names, embeddings) = gallery.to_parts();
        let file = CacheFile {
            version: CACHE_FORMAT_VERSION,
            created_at: Utc::now(),
            fingerprint: fingerprint.map(str::to_string),
            embeddings,
            names,
        };
        let bytes = serde_json::to_vec(&file).map_err(|e| CacheError::Corrupt {
            path: path.clone(),
            reason: format!("serialize: {e}"),
        })?;

        let tmp = temp_path(path);
        let write = || -> std::io::Result<()> {
            let mut f = fs::File::create(&tmp)?;
            f.write_all(&bytes)?;
            f.sync_all()?;
            fs::rename(&tmp, path)
        };
        if let Err(e) = write() {
            let _ = fs::remove_file(&tmp);
            return Err(io_err(e));
        }

        tracing::info!(path = %path.display(), entries = gallery.len(), "gallery cache saved");
        Ok(())
    }

    /// Delete the cache artifact. Returns whether one existed.
    pub fn invalidate(&self) -> Result<bool, CacheError> {
        match fs::remove_file(&self.cache_path) {
            Ok(()) => {
                tracing::info!(path = %self.cache_path.display(), "gallery cache removed");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::Io {
                path: self.cache_path.clone(),
                source: e,
            }),
        }
    }

    /// Encode every enrollment image and assemble a gallery.
    ///
    /// Images without a detectable face, or whose extraction fails, are
    /// logged and skipped. Only the first embedding per image is used.
    pub fn rebuild(
        &self,
        source: &dyn EnrollmentSource,
        extractor: &mut dyn EmbeddingExtractor,
    ) -> Result<RebuildReport, StoreError> {
        let records = source.records()?;
        build_from_records(&records, extractor)
    }

    /// Startup policy: use the cache when present (and, under
    /// [`CacheValidation::Fingerprint`], current); otherwise rebuild and save.
    pub fn open(
        &self,
        source: &dyn EnrollmentSource,
        extractor: &mut dyn EmbeddingExtractor,
        validation: CacheValidation,
    ) -> Result<OpenedGallery, StoreError> {
        let mut records = None;

        match self.load() {
            Ok(cached) => match validation {
                CacheValidation::Trust => {
                    tracing::info!("cache validation disabled; using cached gallery as-is");
                    return Ok(OpenedGallery {
                        gallery: cached.gallery,
                        origin: GalleryOrigin::Cache,
                    });
                }
                CacheValidation::Fingerprint => {
                    let current = source.records()?;
                    let fingerprint = enrollment_fingerprint(&current);
                    if cached.fingerprint.as_deref() == Some(fingerprint.as_str()) {
                        tracing::info!(fingerprint = %fingerprint, "gallery cache is current");
                        return Ok(OpenedGallery {
                            gallery: cached.gallery,
                            origin: GalleryOrigin::Cache,
                        });
                    }
                    tracing::warn!(
                        cached = cached.fingerprint.as_deref().unwrap_or("none"),
                        current = %fingerprint,
                        "gallery cache is stale; rebuilding"
                    );
                    records = Some(current);
                }
            },
            Err(CacheError::Miss(path)) => {
                tracing::info!(path = %path.display(), "gallery cache not found; rebuilding");
            }
            Err(e) => {
                tracing::warn!(error = %e, "gallery cache unusable; rebuilding");
            }
        }

        let records = match records {
            Some(r) => r,
            None => source.records()?,
        };
        let report = build_from_records(&records, extractor)?;

        if let Err(e) = self.save(&report.gallery, Some(&report.fingerprint)) {
            // Matching can proceed; the next start rebuilds again.
            tracing::error!(error = %e, "failed to save gallery cache");
        }

        Ok(OpenedGallery {
            gallery: report.gallery,
            origin: GalleryOrigin::Rebuilt,
        })
    }
}

fn build_from_records(
    records: &[EnrollmentRecord],
    extractor: &mut dyn EmbeddingExtractor,
) -> Result<RebuildReport, StoreError> {
    let mut gallery = Gallery::new();
    let mut skipped = 0;

    for record in records {
        let faces = match extractor.extract(&record.image) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(identity = %record.name, error = %e, "enrollment image extraction failed; skipping");
                skipped += 1;
                continue;
            }
        };
        let Some(first) = faces.into_iter().next() else {
            tracing::warn!(identity = %record.name, "no face found in enrollment image; skipping");
            skipped += 1;
            continue;
        };
        if let Err(e) = gallery.push(record.name.clone(), first) {
            tracing::error!(identity = %record.name, error = %e, "enrollment embedding rejected");
            skipped += 1;
        }
    }

    tracing::info!(
        images = records.len(),
        encoded = gallery.len(),
        skipped,
        "encodings generated"
    );

    if gallery.is_empty() {
        tracing::error!(images = records.len(), "no usable enrollment embeddings");
        return Err(StoreError::EmptyGallery);
    }

    Ok(RebuildReport {
        gallery,
        fingerprint: enrollment_fingerprint(records),
        images: records.len(),
        skipped,
    })
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "gallery".into());
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeExtractor;
    use tempfile::TempDir;

    fn record(name: &str, image: &[u8]) -> EnrollmentRecord {
        EnrollmentRecord {
            name: name.into(),
            image: image.to_vec(),
        }
    }

    fn sample_gallery() -> Gallery {
        Gallery::from_parts(
            vec!["alice".into(), "Bob".into()],
            vec![
                Embedding::new(vec![0.5, -0.25, 0.125]),
                Embedding::new(vec![1.0, 0.0, -1.0]),
            ],
        )
        .unwrap()
    }

    fn store(dir: &TempDir) -> GalleryStore {
        GalleryStore::new(dir.path().join("encodings.json"))
    }

    #[test]
    fn test_load_missing_is_miss() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(store(&dir).load(), Err(CacheError::Miss(_))));
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let gallery = sample_gallery();
        store.save(&gallery, Some("abc")).unwrap();

        let cached = store.load().unwrap();
        assert_eq!(cached.gallery, gallery);
        assert_eq!(cached.fingerprint.as_deref(), Some("abc"));
    }

    #[test]
    fn test_round_trip_arbitrary_floats() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let values: Vec<f32> = (0..128).map(|i| ((i as f32) * 0.7311).sin() * 0.3).collect();
        let gallery = Gallery::from_parts(vec!["x".into()], vec![Embedding::new(values.clone())]).unwrap();
        store.save(&gallery, None).unwrap();

        let loaded = store.load().unwrap().gallery;
        let restored = &loaded.entries()[0].embedding.values;
        for (a, b) in values.iter().zip(restored) {
            assert!((a - b).abs() <= f32::EPSILON, "{a} != {b}");
        }
    }

    #[test]
    fn test_save_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.save(&sample_gallery(), None).unwrap();
        assert!(!temp_path(store.cache_path()).exists());
    }

    #[test]
    fn test_save_creates_parent_dir() {
        let dir = TempDir::new().unwrap();
        let store = GalleryStore::new(dir.path().join("nested/cache/encodings.json"));
        store.save(&sample_gallery(), None).unwrap();
        assert!(store.load().is_ok());
    }

    #[test]
    fn test_truncated_cache_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.save(&sample_gallery(), None).unwrap();
        let bytes = fs::read(store.cache_path()).unwrap();
        fs::write(store.cache_path(), &bytes[..bytes.len() / 2]).unwrap();
        assert!(matches!(store.load(), Err(CacheError::Corrupt { .. })));
    }

    #[test]
    fn test_mismatched_lengths_are_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let json = r#"{"version":1,"created_at":"2025-01-01T00:00:00Z","fingerprint":null,
            "embeddings":[[1.0,2.0]],"names":["a","b"]}"#;
        fs::write(store.cache_path(), json).unwrap();
        assert!(matches!(store.load(), Err(CacheError::Corrupt { .. })));
    }

    #[test]
    fn test_mixed_dimensions_are_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let json = r#"{"version":1,"created_at":"2025-01-01T00:00:00Z","fingerprint":null,
            "embeddings":[[1.0,2.0],[1.0]],"names":["a","b"]}"#;
        fs::write(store.cache_path(), json).unwrap();
        assert!(matches!(store.load(), Err(CacheError::Corrupt { .. })));
    }

    #[test]
    fn test_invalidate() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert!(!store.invalidate().unwrap());
        store.save(&sample_gallery(), None).unwrap();
        assert!(store.invalidate().unwrap());
        assert!(matches!(store.load(), Err(CacheError::Miss(_))));
    }

    #[test]
    fn test_rebuild_skips_failed_images() {
        let dir = TempDir::new().unwrap();
        let source = vec![
            record("alice", b"alice.jpg"),
            record("nobody", b"blank.jpg"),
            record("broken", b"garbage"),
            record("bob", b"bob.jpg"),
        ];
        let mut extractor = FakeExtractor::default()
            .with(b"alice.jpg", vec![vec![1.0, 0.0], vec![9.0, 9.0]])
            .with(b"blank.jpg", vec![])
            .with(b"bob.jpg", vec![vec![0.0, 1.0]]);

        let report = store(&dir).rebuild(&source, &mut extractor).unwrap();
        assert_eq!(report.images, 4);
        assert_eq!(report.skipped, 2);
        let (names, embeddings) = report.gallery.to_parts();
        assert_eq!(names, vec!["alice", "bob"]);
        // First face only.
        assert_eq!(embeddings[0].values, vec![1.0, 0.0]);
    }

    #[test]
    fn test_rebuild_rejects_mixed_dimensions() {
        let dir = TempDir::new().unwrap();
        let source = vec![record("a", b"a"), record("b", b"b")];
        let mut extractor = FakeExtractor::default()
            .with(b"a", vec![vec![1.0, 0.0]])
            .with(b"b", vec![vec![1.0, 0.0, 0.0]]);
        let report = store(&dir).rebuild(&source, &mut extractor).unwrap();
        assert_eq!(report.gallery.len(), 1);
        assert_eq!(report.skipped, 1);
    }

    #[test]
    fn test_rebuild_empty_source_is_empty_gallery() {
        let dir = TempDir::new().unwrap();
        let mut extractor = FakeExtractor::default();
        let err = store(&dir).rebuild(&Vec::<EnrollmentRecord>::new(), &mut extractor).unwrap_err();
        assert!(matches!(err, StoreError::EmptyGallery));
    }

    #[test]
    fn test_open_rebuilds_and_saves_on_miss() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let source = vec![record("alice", b"alice.jpg")];
        let mut extractor = FakeExtractor::default().with(b"alice.jpg", vec![vec![1.0, 0.0]]);

        let opened = store.open(&source, &mut extractor, CacheValidation::Fingerprint).unwrap();
        assert_eq!(opened.origin, GalleryOrigin::Rebuilt);
        let cached = store.load().unwrap();
        assert_eq!(cached.fingerprint, Some(enrollment_fingerprint(&source)));
    }

    #[test]
    fn test_open_uses_current_cache_without_extraction() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let source = vec![record("alice", b"alice.jpg")];
        let mut extractor = FakeExtractor::default().with(b"alice.jpg", vec![vec![1.0, 0.0]]);
        store.open(&source, &mut extractor, CacheValidation::Fingerprint).unwrap();
        assert_eq!(extractor.call_count(), 1);

        let opened = store.open(&source, &mut extractor, CacheValidation::Fingerprint).unwrap();
        assert_eq!(opened.origin, GalleryOrigin::Cache);
        assert_eq!(extractor.call_count(), 1);
    }

    #[test]
    fn test_open_fingerprint_detects_stale_cache() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let mut extractor = FakeExtractor::default()
            .with(b"alice.jpg", vec![vec![1.0, 0.0]])
            .with(b"bob.jpg", vec![vec![0.0, 1.0]]);
        store
            .open(&vec![record("alice", b"alice.jpg")], &mut extractor, CacheValidation::Fingerprint)
            .unwrap();

        let grown = vec![record("alice", b"alice.jpg"), record("bob", b"bob.jpg")];
        let opened = store.open(&grown, &mut extractor, CacheValidation::Fingerprint).unwrap();
        assert_eq!(opened.origin, GalleryOrigin::Rebuilt);
        assert_eq!(opened.gallery.len(), 2);
    }

    #[test]
    fn test_open_trust_keeps_stale_cache() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let mut extractor = FakeExtractor::default()
            .with(b"alice.jpg", vec![vec![1.0, 0.0]])
            .with(b"bob.jpg", vec![vec![0.0, 1.0]]);
        store
            .open(&vec![record("alice", b"alice.jpg")], &mut extractor, CacheValidation::Trust)
            .unwrap();

        let grown = vec![record("alice", b"alice.jpg"), record("bob", b"bob.jpg")];
        let opened = store.open(&grown, &mut extractor, CacheValidation::Trust).unwrap();
        assert_eq!(opened.origin, GalleryOrigin::Cache);
        assert_eq!(opened.gallery.len(), 1);
    }

    #[test]
    fn test_open_recovers_from_corrupt_cache() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        fs::write(store.cache_path(), b"not json").unwrap();
        let source = vec![record("alice", b"alice.jpg")];
        let mut extractor = FakeExtractor::default().with(b"alice.jpg", vec![vec![1.0, 0.0]]);
        let opened = store.open(&source, &mut extractor, CacheValidation::Trust).unwrap();
        assert_eq!(opened.origin, GalleryOrigin::Rebuilt);
        assert!(store.load().is_ok());
    }

    #[test]
    fn test_open_empty_gallery_does_not_write_cache() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let source = vec![record("ghost", b"blank.jpg")];
        let mut extractor = FakeExtractor::default().with(b"blank.jpg", vec![]);
        let err = store.open(&source, &mut extractor, CacheValidation::Fingerprint).unwrap_err();
        assert!(matches!(err, StoreError::EmptyGallery));
        assert!(!store.cache_path().exists());
    }

    #[test]
    fn test_fingerprint_sensitive_to_content_and_order() {
        let a = vec![record("a", b"1"), record("b", b"2")];
        let swapped = vec![record("b", b"2"), record("a", b"1")];
        let edited = vec![record("a", b"1"), record("b", b"3")];
        let fp = enrollment_fingerprint(&a);
        assert_eq!(fp, enrollment_fingerprint(&a.clone()));
        assert_ne!(fp, enrollment_fingerprint(&swapped));
        assert_ne!(fp, enrollment_fingerprint(&edited));
    }

    #[test]
    fn test_fingerprint_separates_fields() {
        let joined = vec![record("ab", b"c")];
        let split = vec![record("a", b"bc")];
        assert_ne!(enrollment_fingerprint(&joined), enrollment_fingerprint(&split));
    }

    #[test]
    fn test_cache_validation_from_str() {
        assert_eq!("Trust".parse::<CacheValidation>(), Ok(CacheValidation::Trust));
        assert_eq!("fingerprint".parse::<CacheValidation>(), Ok(CacheValidation::Fingerprint));
        assert!("sometimes".parse::<CacheValidation>().is_err());
    }
}
