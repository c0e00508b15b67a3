//! EXIF helpers: orientation correction and 35mm-equivalent focal length.

use std::io::Cursor;

use image::DynamicImage;

/// Focal length assumed when a photo carries no usable EXIF focal length.
pub const DEFAULT_FOCAL_LENGTH_35MM: f32 = 30.0;

/// Diagonal of a full-frame 36x24mm sensor.
const FULL_FRAME_DIAGONAL_MM: f32 = 43.266_615;

/// Subset of EXIF fields the loader cares about.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ExifSummary {
    pub orientation: u32,
    pub focal_length_35mm: Option<f32>,
}

/// Parse the EXIF container embedded in `bytes`. Missing or corrupt EXIF
/// yields the default summary (orientation 1, no focal length).
pub fn read_exif_summary(bytes: &[u8]) -> ExifSummary {
    let mut cursor = Cursor::new(bytes);
    let reader = match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(r) => r,
        Err(_) => {
            return ExifSummary {
                orientation: 1,
                focal_length_35mm: None,
            };
        }
    };

    let orientation = reader
        .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
        .unwrap_or(1);
    let focal_length_35mm = reader
        .get_field(exif::Tag::FocalLengthIn35mmFilm, exif::In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
        .map(|mm| mm as f32)
        .filter(|mm| *mm > 0.0);

    ExifSummary {
        orientation,
        focal_length_35mm,
    }
}

/// Apply EXIF orientation transform to a `DynamicImage`.
///
/// 1 = normal, 2 = mirrored, 3 = 180deg, 4 = flipped vertically,
/// 5 = mirrored + 90deg CW, 6 = 90deg CW, 7 = mirrored + 270deg CW, 8 = 270deg CW.
pub fn apply_orientation(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

/// Convert a 35mm-equivalent focal length into pixels for a `width` x `height`
/// image by matching the image diagonal against the full-frame diagonal.
pub fn focal_length_px_from_35mm(focal_35mm: f32, width: u32, height: u32) -> f32 {
    let diagonal_px = ((width as f32).powi(2) + (height as f32).powi(2)).sqrt();
    focal_35mm * diagonal_px / FULL_FRAME_DIAGONAL_MM
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use image::RgbImage;

    #[test]
    fn full_frame_diagonal_maps_mm_to_px_one_to_one() {
        // A 36x24 "pixel" sensor has the reference diagonal.
        assert_relative_eq!(
            focal_length_px_from_35mm(50.0, 36, 24),
            50.0,
            max_relative = 1e-5
        );
    }

    #[test]
    fn focal_length_scales_with_diagonal() {
        let f = focal_length_px_from_35mm(30.0, 4000, 3000);
        assert_relative_eq!(f, 30.0 * 5000.0 / FULL_FRAME_DIAGONAL_MM, max_relative = 1e-6);
    }

    #[test]
    fn garbage_bytes_produce_default_summary() {
        let summary = read_exif_summary(b"definitely not a jpeg");
        assert_eq!(summary.orientation, 1);
        assert_eq!(summary.focal_length_35mm, None);
    }

    #[test]
    fn quarter_turn_orientations_swap_dimensions() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(4, 2));
        for orientation in [5, 6, 7, 8] {
            let rotated = apply_orientation(img.clone(), orientation);
            assert_eq!((rotated.width(), rotated.height()), (2, 4));
        }
        for orientation in [1, 2, 3, 4, 42] {
            let same = apply_orientation(img.clone(), orientation);
            assert_eq!((same.width(), same.height()), (4, 2));
        }
    }
}
