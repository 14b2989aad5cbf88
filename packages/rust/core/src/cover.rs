//! Cover image probing: format, dimensions and content hash.

use std::path::Path;

use image::{GenericImageView, ImageFormat};
use sha2::{Digest, Sha256};

use spacecraft_shared::{CoverImage, Result, SpaceCraftError};

/// Facts about a downloaded cover image.
#[derive(Debug, Clone, PartialEq)]
pub struct CoverFacts {
    /// File extension for the detected format.
    pub format: &'static str,
    pub width: u32,
    pub height: u32,
    pub sha256: String,
}

impl CoverFacts {
    /// The `coverImage` record for a cover stored under `file`.
    pub fn to_cover_image(&self, file: String) -> CoverImage {
        CoverImage {
            file,
            width: self.width,
            height: self.height,
            format: self.format.to_string(),
            sha256: self.sha256.clone(),
        }
    }
}

/// Detect the format of `bytes`, decode them for dimensions and hash them.
pub fn inspect_cover(bytes: &[u8]) -> Result<CoverFacts> {
    let format = image::guess_format(bytes)
        .map_err(|e| SpaceCraftError::Image(format!("unrecognized cover format: {e}")))?;

    let ext = match format {
        ImageFormat::Jpeg => "jpg",
        ImageFormat::Png => "png",
        ImageFormat::Gif => "gif",
        other => {
            return Err(SpaceCraftError::Image(format!(
                "unsupported cover format {other:?}"
            )));
        }
    };

    let img = image::load_from_memory_with_format(bytes, format)
        .map_err(|e| SpaceCraftError::Image(format!("failed to decode cover: {e}")))?;
    let (width, height) = img.dimensions();

    Ok(CoverFacts {
        format: ext,
        width,
        height,
        sha256: sha256_hex(bytes),
    })
}

/// Hex SHA-256 of a byte slice.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Hex SHA-256 of a file on disk.
pub fn sha256_file(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).map_err(|e| SpaceCraftError::io(path, e))?;
    Ok(sha256_hex(&bytes))
}
