//! Image normalization, disparity factor and the align-corners bilinear
//! resize into the predictor's internal resolution.

use image::RgbImage;
use rayon::prelude::*;
use tracing::debug;

use crate::camera::{INTERNAL_RESOLUTION, Resolution};
use crate::error::{Result, SplatError};

/// Planar channel-first `f32` image, `[channels, height, width]`.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageTensor {
    channels: usize,
    height: usize,
    width: usize,
    data: Vec<f32>,
}

impl ImageTensor {
    pub fn from_planar(channels: usize, height: usize, width: usize, data: Vec<f32>) -> Result<Self> {
        if channels == 0 || height == 0 || width == 0 {
            return Err(SplatError::InvalidImage(format!(
                "tensor shape must be positive, got {channels}x{height}x{width}"
            )));
        }
        if data.len() != channels * height * width {
            return Err(SplatError::InvalidImage(format!(
                "tensor buffer holds {} values, expected {}",
                data.len(),
                channels * height * width
            )));
        }
        Ok(Self {
            channels,
            height,
            width,
            data,
        })
    }

    /// `[1, channels, height, width]`, the batch shape the predictor expects.
    pub fn shape(&self) -> [usize; 4] {
        [1, self.channels, self.height, self.width]
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width as u32, self.height as u32)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn at(&self, channel: usize, y: usize, x: usize) -> f32 {
        self.data[(channel * self.height + y) * self.width + x]
    }

    fn plane(&self, channel: usize) -> &[f32] {
        let len = self.height * self.width;
        &self.data[channel * len..(channel + 1) * len]
    }
}

/// Predictor-ready input derived from one photo.
#[derive(Clone, Debug)]
pub struct Preprocessed {
    pub tensor: ImageTensor,
    pub disparity_factor: f32,
    pub original: Resolution,
}

/// Normalize `image`, derive the disparity factor from the original width and
/// resize to the internal resolution.
pub fn preprocess(image: &RgbImage, f_px: f32) -> Result<Preprocessed> {
    preprocess_to(image, f_px, INTERNAL_RESOLUTION)
}

pub fn preprocess_to(image: &RgbImage, f_px: f32, target: Resolution) -> Result<Preprocessed> {
    let original = Resolution::new(image.width(), image.height()).validate()?;
    let target = target.validate()?;

    let normalized = normalize(image)?;
    let disparity_factor = disparity_factor(f_px, original)?;
    let tensor = resize_bilinear_align_corners(&normalized, target);

    debug!(
        "Preprocessed {}x{} -> {}x{} (disparity factor {disparity_factor:.4})",
        original.width, original.height, target.width, target.height
    );

    Ok(Preprocessed {
        tensor,
        disparity_factor,
        original,
    })
}

/// `f_px / W`, always against the original (pre-resize) width.
pub fn disparity_factor(f_px: f32, original: Resolution) -> Result<f32> {
    let original = original.validate()?;
    if !f_px.is_finite() || f_px <= 0.0 {
        return Err(SplatError::InvalidImage(format!(
            "focal length must be positive, got {f_px}"
        )));
    }
    Ok(f_px / original.width as f32)
}

/// Convert 8-bit RGB into a planar `[3, H, W]` tensor with values in `[0, 1]`.
pub fn normalize(image: &RgbImage) -> Result<ImageTensor> {
    let width = image.width() as usize;
    let height = image.height() as usize;
    let plane = width * height;
    let mut data = vec![0.0f32; 3 * plane];
    for (idx, pixel) in image.pixels().enumerate() {
        for c in 0..3 {
            data[c * plane + idx] = pixel[c] as f32 / 255.0;
        }
    }
    ImageTensor::from_planar(3, height, width, data)
}

/// Bilinear resize with align-corners sampling: output pixel `x` reads source
/// coordinate `x * (src_w - 1) / (dst_w - 1)`, so the four corner samples of
/// input and output coincide exactly. Same-size resizes return the input.
pub fn resize_bilinear_align_corners(src: &ImageTensor, target: Resolution) -> ImageTensor {
    let dst_w = target.width as usize;
    let dst_h = target.height as usize;
    if dst_w == src.width && dst_h == src.height {
        return src.clone();
    }

    let (num_x, den_x) = align_corners_ratio(src.width, dst_w);
    let (num_y, den_y) = align_corners_ratio(src.height, dst_h);
    let max_x = src.width - 1;
    let max_y = src.height - 1;

    let mut data = vec![0.0f32; src.channels * dst_w * dst_h];
    data.par_chunks_mut(dst_w)
        .enumerate()
        .for_each(|(row_idx, row)| {
            let channel = row_idx / dst_h;
            let y = row_idx % dst_h;
            let plane = src.plane(channel);

            let fy = (y * num_y) as f64 / den_y;
            let y0 = (fy.floor() as usize).min(max_y);
            let y1 = (y0 + 1).min(max_y);
            let dy = (fy - y0 as f64) as f32;

            for (x, out) in row.iter_mut().enumerate() {
                let fx = (x * num_x) as f64 / den_x;
                let x0 = (fx.floor() as usize).min(max_x);
                let x1 = (x0 + 1).min(max_x);
                let dx = (fx - x0 as f64) as f32;

                let v00 = plane[y0 * src.width + x0];
                let v10 = plane[y0 * src.width + x1];
                let v01 = plane[y1 * src.width + x0];
                let v11 = plane[y1 * src.width + x1];

                let v0 = v00 * (1.0 - dx) + v10 * dx;
                let v1 = v01 * (1.0 - dx) + v11 * dx;
                *out = v0 * (1.0 - dy) + v1 * dy;
            }
        });

    ImageTensor {
        channels: src.channels,
        height: dst_h,
        width: dst_w,
        data,
    }
}

/// Source/destination span pair; the integer numerator keeps the last output
/// sample landing exactly on the last input sample.
fn align_corners_ratio(src: usize, dst: usize) -> (usize, f64) {
    if src <= 1 || dst <= 1 {
        (0, 1.0)
    } else {
        (src - 1, (dst - 1) as f64)
    }
}
