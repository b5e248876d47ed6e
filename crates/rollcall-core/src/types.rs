use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Face embedding vector produced by the external extractor (typically 128-dimensional).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Number of components.
    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// True if every component is a finite number.
    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }

    /// Compute Euclidean distance between two embeddings.
    ///
    /// Callers are responsible for checking that dimensions agree; extra
    /// components on the longer side are ignored.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self { values }
    }
}

/// Normalize an identity name into its matching key: trimmed and uppercased.
pub fn normalize_identity(name: &str) -> String {
    name.trim().to_uppercase()
}

/// One reference embedding for a named identity.
#[derive(Debug, Clone, PartialEq)]
pub struct GalleryEntry {
    pub name: String,
    pub embedding: Embedding,
}

#[derive(Error, Debug, PartialEq)]
pub enum GalleryError {
    #[error("embedding for {name} has {actual} dimensions, gallery uses {expected}")]
    DimensionMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("embedding for {0} is empty")]
    EmptyEmbedding(String),
    #[error("gallery has {names} names but {embeddings} embeddings")]
    LengthMismatch { names: usize, embeddings: usize },
}

/// Ordered set of known identities and their reference embeddings.
///
/// Every entry shares one dimensionality, fixed by the first insert.
/// Insertion order is kept and used for tie-breaking during matching.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
    dimension: Option<usize>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a gallery from parallel name / embedding sequences.
    pub fn from_parts(names: Vec<String>, embeddings: Vec<Embedding>) -> Result<Self, GalleryError> {
        if names.len() != embeddings.len() {
            return Err(GalleryError::LengthMismatch {
                names: names.len(),
                embeddings: embeddings.len(),
            });
        }
        let mut gallery = Self::new();
        for (name, embedding) in names.into_iter().zip(embeddings) {
            gallery.push(name, embedding)?;
        }
        Ok(gallery)
    }

    /// Append an entry, rejecting embeddings whose dimensionality differs from the gallery's.
    pub fn push(&mut self, name: impl Into<String>, embedding: Embedding) -> Result<(), GalleryError> {
        let name = name.into();
        if embedding.dim() == 0 {
            return Err(GalleryError::EmptyEmbedding(name));
        }
        match self.dimension {
            Some(expected) if expected != embedding.dim() => {
                return Err(GalleryError::DimensionMismatch {
                    name,
                    expected,
                    actual: embedding.dim(),
                });
            }
            Some(_) => {}
            None => self.dimension = Some(embedding.dim()),
        }
        self.entries.push(GalleryEntry { name, embedding });
        Ok(())
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Embedding dimensionality, or `None` for an empty gallery.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Split into parallel name / embedding sequences (cache layout).
    pub fn to_parts(&self) -> (Vec<String>, Vec<Embedding>) {
        self.entries
            .iter()
            .map(|e| (e.name.clone(), e.embedding.clone()))
            .unzip()
    }

    /// Distinct normalized identities, in first-appearance order.
    pub fn identities(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.entries
            .iter()
            .map(|e| normalize_identity(&e.name))
            .filter(|n| seen.insert(n.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_distance() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_distance_identical() {
        let a = Embedding::new(vec![0.1, 0.2, 0.3]);
        assert_eq!(a.euclidean_distance(&a.clone()), 0.0);
    }

    #[test]
    fn test_normalize_identity() {
        assert_eq!(normalize_identity("  alice smith "), "ALICE SMITH");
        assert_eq!(normalize_identity("BOB"), "BOB");
    }

    #[test]
    fn test_gallery_rejects_dimension_mismatch() {
        let mut gallery = Gallery::new();
        gallery.push("alice", Embedding::new(vec![1.0, 0.0])).unwrap();
        let err = gallery.push("bob", Embedding::new(vec![1.0, 0.0, 0.0])).unwrap_err();
        assert_eq!(
            err,
            GalleryError::DimensionMismatch { name: "bob".into(), expected: 2, actual: 3 }
        );
        assert_eq!(gallery.len(), 1);
    }

    #[test]
    fn test_gallery_rejects_empty_embedding() {
        let mut gallery = Gallery::new();
        assert!(gallery.push("alice", Embedding::new(vec![])).is_err());
        assert_eq!(gallery.dimension(), None);
    }

    #[test]
    fn test_from_parts_length_mismatch() {
        let err = Gallery::from_parts(vec!["a".into(), "b".into()], vec![Embedding::new(vec![1.0])])
            .unwrap_err();
        assert_eq!(err, GalleryError::LengthMismatch { names: 2, embeddings: 1 });
    }

    #[test]
    fn test_to_parts_preserves_order() {
        let gallery = Gallery::from_parts(
            vec!["b".into(), "a".into()],
            vec![Embedding::new(vec![2.0]), Embedding::new(vec![1.0])],
        )
        .unwrap();
        let (names, embeddings) = gallery.to_parts();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(embeddings[0].values, vec![2.0]);
    }

    #[test]
    fn test_identities_dedups_case_insensitively() {
        let gallery = Gallery::from_parts(
            vec!["alice".into(), "Bob".into(), "ALICE".into()],
            vec![
                Embedding::new(vec![1.0]),
                Embedding::new(vec![2.0]),
                Embedding::new(vec![3.0]),
            ],
        )
        .unwrap();
        assert_eq!(gallery.identities(), vec!["ALICE", "BOB"]);
    }
}
