//! Single-image metric Gaussian Splat reconstruction.
//!
//! [`Pipeline::process`] turns one photo into a viewer-ready PLY: the image is
//! normalized and resized to the predictor's internal resolution, the learned
//! predictor emits Gaussians in normalized device coordinates, and those are
//! lifted into metric camera space using the photo's focal length before being
//! serialized.
//!
//! Inference through libtorch is available behind the `with-tch` feature; the
//! rest of the crate is backend agnostic and drives any [`Predictor`].

pub mod camera;
pub mod config;
pub mod device;
mod error;
pub mod gaussians;
mod handle;
pub mod pipeline;
pub mod ply;
pub mod predictor;
pub mod preprocess;
pub mod store;
#[cfg(feature = "with-tch")]
pub mod torch;
pub mod unproject;

pub use camera::{Extrinsics, INTERNAL_RESOLUTION, Intrinsics, Resolution};
pub use config::PipelineConfig;
pub use device::{ComputeDevice, DeviceProbe, HostProbe, select_device};
pub use error::{Result, SplatError};
pub use gaussians::{Gaussian3D, GaussianNdc, Gaussians3D};
pub use handle::{ModelHandle, ModelSource};
pub use pipeline::{Pipeline, SplatOutput};
pub use predictor::{ModelLoader, Predictor};
pub use preprocess::{ImageTensor, Preprocessed, preprocess};
pub use store::{HttpModelStore, ModelStore};
pub use unproject::unproject;
