//! Pinhole camera model in the homogeneous 4x4 form the unprojector consumes.

use nalgebra::{Matrix3, Matrix4};

use crate::error::{Result, SplatError};

/// Image size in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn validate(self) -> Result<Self> {
        if self.width == 0 || self.height == 0 {
            return Err(SplatError::InvalidImage(format!(
                "dimensions must be positive, got {}x{}",
                self.width, self.height
            )));
        }
        Ok(self)
    }
}

/// Fixed input resolution of the predictor.
pub const INTERNAL_RESOLUTION: Resolution = Resolution::new(1536, 1536);

/// Homogeneous pinhole intrinsics:
///
/// ```text
/// [fx 0  cx 0]
/// [0  fy cy 0]
/// [0  0  1  0]
/// [0  0  0  1]
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Intrinsics {
    matrix: Matrix4<f32>,
}

impl Intrinsics {
    /// Intrinsics for an image of `resolution` shot with focal length `f_px`,
    /// principal point at the image centre.
    pub fn from_focal(f_px: f32, resolution: Resolution) -> Result<Self> {
        let resolution = resolution.validate()?;
        if !f_px.is_finite() || f_px <= 0.0 {
            return Err(SplatError::InvalidImage(format!(
                "focal length must be positive, got {f_px}"
            )));
        }
        let cx = resolution.width as f32 / 2.0;
        let cy = resolution.height as f32 / 2.0;
        #[rustfmt::skip]
        let matrix = Matrix4::new(
            f_px, 0.0,  cx,  0.0,
            0.0,  f_px, cy,  0.0,
            0.0,  0.0,  1.0, 0.0,
            0.0,  0.0,  0.0, 1.0,
        );
        Ok(Self { matrix })
    }

    /// Rescale to `target`: row 0 by `target.width / original.width`, row 1 by
    /// `target.height / original.height`. The two ratios are independent.
    pub fn scaled_to(&self, original: Resolution, target: Resolution) -> Result<Self> {
        let original = original.validate()?;
        let target = target.validate()?;
        let sx = target.width as f32 / original.width as f32;
        let sy = target.height as f32 / original.height as f32;
        let mut matrix = self.matrix;
        matrix.row_mut(0).scale_mut(sx);
        matrix.row_mut(1).scale_mut(sy);
        Ok(Self { matrix })
    }

    pub fn fx(&self) -> f32 {
        self.matrix[(0, 0)]
    }

    pub fn fy(&self) -> f32 {
        self.matrix[(1, 1)]
    }

    pub fn cx(&self) -> f32 {
        self.matrix[(0, 2)]
    }

    pub fn cy(&self) -> f32 {
        self.matrix[(1, 2)]
    }

    pub fn matrix(&self) -> &Matrix4<f32> {
        &self.matrix
    }

    /// Classic 3x3 calibration matrix K.
    pub fn k(&self) -> Matrix3<f32> {
        self.matrix.fixed_view::<3, 3>(0, 0).into_owned()
    }
}

/// World-to-camera transform. The pipeline only ever uses the identity.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Extrinsics {
    matrix: Matrix4<f32>,
}

impl Extrinsics {
    pub fn identity() -> Self {
        Self {
            matrix: Matrix4::identity(),
        }
    }

    pub fn from_matrix(matrix: Matrix4<f32>) -> Self {
        Self { matrix }
    }

    pub fn matrix(&self) -> &Matrix4<f32> {
        &self.matrix
    }
}

impl Default for Extrinsics {
    fn default() -> Self {
        Self::identity()
    }
}
