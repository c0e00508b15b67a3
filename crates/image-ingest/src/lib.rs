//! Still-image ingestion for the splat pipeline.
//!
//! Decodes a photo from disk, rotates it upright according to its EXIF
//! orientation and estimates the focal length in pixels from the
//! `FocalLengthIn35mmFilm` tag, falling back to a 30mm-equivalent lens.

use std::{fs, path::Path};

use tracing::{debug, warn};

pub mod metadata;
mod types;

pub use metadata::{DEFAULT_FOCAL_LENGTH_35MM, focal_length_px_from_35mm};
pub use types::{FocalSource, IngestError, LoadedImage};

/// Source of decoded images for the pipeline.
pub trait ImageLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<LoadedImage, IngestError>;
}

/// Filesystem loader backed by the `image` crate and `kamadak-exif`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExifImageLoader;

impl ImageLoader for ExifImageLoader {
    fn load(&self, path: &Path) -> Result<LoadedImage, IngestError> {
        load_rgb(path)
    }
}

/// Read `path`, decode it to 8-bit RGB and estimate its focal length.
pub fn load_rgb(path: &Path) -> Result<LoadedImage, IngestError> {
    let bytes = fs::read(path).map_err(|source| IngestError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let decoded = image::load_from_memory(&bytes).map_err(|source| IngestError::Decode {
        path: path.to_path_buf(),
        source,
    })?;

    let summary = metadata::read_exif_summary(&bytes);
    let pixels = metadata::apply_orientation(decoded, summary.orientation).into_rgb8();
    let (width, height) = pixels.dimensions();
    if width == 0 || height == 0 {
        return Err(IngestError::Empty {
            path: path.to_path_buf(),
            width,
            height,
        });
    }

    let focal_source = match summary.focal_length_35mm {
        Some(mm) => FocalSource::Exif(mm),
        None => {
            warn!(
                "No EXIF focal length in {}; assuming {DEFAULT_FOCAL_LENGTH_35MM}mm",
                path.display()
            );
            FocalSource::Fallback(DEFAULT_FOCAL_LENGTH_35MM)
        }
    };
    let focal_35mm = match focal_source {
        FocalSource::Exif(mm) | FocalSource::Fallback(mm) => mm,
    };
    let focal_length_px = focal_length_px_from_35mm(focal_35mm, width, height);

    debug!(
        "Loaded {} ({width}x{height}, orientation {}, f_px {focal_length_px:.1})",
        path.display(),
        summary.orientation
    );

    Ok(LoadedImage {
        pixels,
        focal_length_px,
        focal_source,
    })
}
