//! Nearest-neighbour face matching with a fixed distance tolerance.

use crate::types::{normalize_identity, Embedding, Gallery};
use thiserror::Error;

/// Default tolerance for 128-d face embeddings.
pub const DEFAULT_TOLERANCE: f32 = 0.6;

/// Result of matching a probe embedding against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchResult {
    Matched {
        /// Normalized (uppercased) identity of the nearest entry.
        identity: String,
        distance: f32,
        /// Gallery index of the nearest entry.
        index: usize,
    },
    Unmatched {
        /// Distance to the nearest entry, `None` for an empty gallery.
        nearest: Option<f32>,
    },
}

impl MatchResult {
    pub fn is_match(&self) -> bool {
        matches!(self, MatchResult::Matched { .. })
    }

    pub fn identity(&self) -> Option<&str> {
        match self {
            MatchResult::Matched { identity, .. } => Some(identity),
            MatchResult::Unmatched { .. } => None,
        }
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum MatchError {
    #[error("probe has {actual} dimensions, gallery uses {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("probe embedding contains non-finite values")]
    NonFinite,
    #[error("tolerance must be a non-negative number, got {0}")]
    InvalidTolerance(f32),
}

/// Strategy for comparing a probe embedding against a gallery of enrolled faces.
pub trait Matcher {
    fn compare(
        &self,
        probe: &Embedding,
        gallery: &Gallery,
        tolerance: f32,
    ) -> Result<MatchResult, MatchError>;
}

/// Euclidean nearest-neighbour matcher.
///
/// The nearest entry is accepted only when its distance is within
/// `tolerance`. On exact ties the lowest gallery index wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(
        &self,
        probe: &Embedding,
        gallery: &Gallery,
        tolerance: f32,
    ) -> Result<MatchResult, MatchError> {
        if tolerance.is_nan() || tolerance < 0.0 {
            return Err(MatchError::InvalidTolerance(tolerance));
        }
        let Some(expected) = gallery.dimension() else {
            return Ok(MatchResult::Unmatched { nearest: None });
        };
        if probe.dim() != expected {
            return Err(MatchError::DimensionMismatch {
                expected,
                actual: probe.dim(),
            });
        }
        if !probe.is_finite() {
            return Err(MatchError::NonFinite);
        }

        let mut best: Option<(usize, f32)> = None;
        for (i, entry) in gallery.entries().iter().enumerate() {
            let distance = probe.euclidean_distance(&entry.embedding);
            // Strict comparison keeps the earliest index on ties.
            let closer = match best {
                Some((_, d)) => distance < d,
                None => true,
            };
            if closer {
                best = Some((i, distance));
            }
        }

        Ok(match best {
            Some((index, distance)) if distance <= tolerance => MatchResult::Matched {
                identity: normalize_identity(&gallery.entries()[index].name),
                distance,
                index,
            },
            Some((_, distance)) => MatchResult::Unmatched {
                nearest: Some(distance),
            },
            None => MatchResult::Unmatched { nearest: None },
        })
    }
}
