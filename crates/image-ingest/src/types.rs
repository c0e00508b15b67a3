use std::path::PathBuf;

use image::RgbImage;
use thiserror::Error;

/// Decoded RGB photograph plus the focal length the camera most likely used.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    pub pixels: RgbImage,
    pub focal_length_px: f32,
    pub focal_source: FocalSource,
}

impl LoadedImage {
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }
}

/// Where the focal length estimate came from.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FocalSource {
    /// `FocalLengthIn35mmFilm` tag, value in millimetres.
    Exif(f32),
    /// No usable tag; the default 35mm-equivalent focal length was assumed.
    Fallback(f32),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to read image {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode image {path:?}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("image {path:?} has empty dimensions {width}x{height}")]
    Empty {
        path: PathBuf,
        width: u32,
        height: u32,
    },
}
