//! Seams around the learned model: inference and construction from weights.

use std::sync::Arc;

use crate::device::ComputeDevice;
use crate::error::Result;
use crate::gaussians::GaussianNdc;
use crate::preprocess::ImageTensor;

/// Maps a preprocessed image and its disparity factor to a batch of Gaussians
/// in NDC space. The returned order is canonical and must not be changed by
/// callers. Failures surface as [`crate::SplatError::InferenceFailed`].
pub trait Predictor: Send + Sync {
    fn infer(&self, image: &ImageTensor, disparity_factor: f32) -> Result<Vec<GaussianNdc>>;
}

/// Builds a ready-to-run predictor from a serialized parameter blob.
pub trait ModelLoader: Send + Sync {
    fn load(&self, params: &[u8], device: ComputeDevice) -> anyhow::Result<Arc<dyn Predictor>>;
}
