//! Enrollment image preparation: decode any supported format, store as JPEG.

use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PrepareError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("image {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: image::ImageError,
    },
    #[error("jpeg encode: {0}")]
    Encode(#[from] image::ImageError),
}

/// Read an image file and re-encode it as JPEG bytes for the `faces` table.
///
/// Fails for files the `image` crate cannot decode, so unreadable images
/// never reach the enrollment store.
pub fn prepare_image(path: &Path) -> Result<Vec<u8>, PrepareError> {
    let bytes = std::fs::read(path)?;
    let img = image::load_from_memory(&bytes).map_err(|source| PrepareError::Decode {
        path: path.display().to_string(),
        source,
    })?;
    encode_jpeg(&img)
}

fn encode_jpeg(img: &DynamicImage) -> Result<Vec<u8>, PrepareError> {
    // JPEG has no alpha channel.
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut out = Vec::new();
    rgb.write_to(&mut Cursor::new(&mut out), ImageFormat::Jpeg)?;
    Ok(out)
}

/// Default enrollment name for an image file: its stem.
pub fn name_from_path(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
