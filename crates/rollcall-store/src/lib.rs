//! rollcall-store: enrollment source backed by SQLite.
//!
//! Holds one row per enrollment image in a `faces` table, prepares
//! images for insertion and runs the external embedding extractor.

pub mod extractor;
pub mod faces;
pub mod prepare;

pub use extractor::CommandExtractor;
pub use faces::{EnrolledFace, FaceStore, FaceStoreError};
pub use prepare::{name_from_path, prepare_image, PrepareError};
