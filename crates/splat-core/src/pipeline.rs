//! One photo in, one cleaned splat PLY out.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};

use image_ingest::ImageLoader;
use tempfile::TempDir;
use tracing::{debug, info, info_span};

use crate::camera::{Extrinsics, Intrinsics};
use crate::config::PipelineConfig;
use crate::device::{ComputeDevice, DeviceProbe, select_device};
use crate::error::{Result, SplatError};
use crate::handle::{ModelHandle, ModelSource};
use crate::ply;
use crate::predictor::ModelLoader;
use crate::preprocess::preprocess;
use crate::store::ModelStore;
use crate::unproject::unproject;

/// Orchestrates load, preprocess, predict, unproject and serialize for each
/// request. Shareable across threads; the model is loaded on first use.
pub struct Pipeline {
    handle: ModelHandle,
    image_loader: Arc<dyn ImageLoader>,
    depth_epsilon: f32,
}

impl Pipeline {
    pub fn new(handle: ModelHandle, image_loader: Arc<dyn ImageLoader>, depth_epsilon: f32) -> Self {
        Self {
            handle,
            image_loader,
            depth_epsilon,
        }
    }

    /// Validate `config`, pick a device and wire an unloaded model handle.
    pub fn from_config(
        config: &PipelineConfig,
        store: Arc<dyn ModelStore>,
        model_loader: Arc<dyn ModelLoader>,
        image_loader: Arc<dyn ImageLoader>,
        probe: &dyn DeviceProbe,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|err| SplatError::processing_with("invalid configuration", err))?;
        let device = if config.force_cpu {
            ComputeDevice::Cpu
        } else {
            select_device(probe)
        };
        info!("Using {device} backend");

        let source = ModelSource {
            identifier: config.model_url.clone(),
            cache_dir: config.cache_dir.clone(),
            store,
            loader: model_loader,
        };
        Ok(Self::new(
            ModelHandle::new(source, device),
            image_loader,
            config.depth_epsilon,
        ))
    }

    pub fn handle(&self) -> &ModelHandle {
        &self.handle
    }

    /// Run the full reconstruction for `input`.
    ///
    /// The returned [`SplatOutput`] owns a private temporary directory holding
    /// the cleaned PLY; nothing is left behind when any stage fails.
    pub fn process(&self, input: &Path) -> Result<SplatOutput> {
        if input.as_os_str().is_empty() {
            return Err(SplatError::processing("input path is empty"));
        }
        let span = info_span!("splat.process", input = %input.display());
        let _enter = span.enter();
        let started = Instant::now();

        let predictor = self.handle.ensure_loaded()?;
        let loaded = timed("load", || Ok(self.image_loader.load(input)?))?;
        let f_px = loaded.focal_length_px;
        let prepared = timed("preprocess", || preprocess(&loaded.pixels, f_px))?;

        let internal = prepared.tensor.resolution();
        let intrinsics =
            Intrinsics::from_focal(f_px, prepared.original)?.scaled_to(prepared.original, internal)?;

        let batch = timed("predict", || {
            predictor.infer(&prepared.tensor, prepared.disparity_factor)
        })?;
        let gaussians = timed("unproject", || {
            unproject(
                &batch,
                &intrinsics,
                &Extrinsics::identity(),
                internal,
                self.depth_epsilon,
            )
        })?;

        let dir = tempfile::Builder::new()
            .prefix("splat-")
            .tempdir()
            .map_err(|err| SplatError::processing_with("cannot create temporary directory", err))?;
        let path = dir.path().join(format!("{}.ply", output_stem(input)));
        timed("serialize", || {
            ply::write(&gaussians, f_px, prepared.original, &path)?;
            ply::clean(&path)
        })?;

        let written = ply::vertex_count(&path)?;
        if written != batch.len() {
            return Err(SplatError::processing(format!(
                "serialized {written} vertices for {} predicted gaussians",
                batch.len()
            )));
        }

        info!(
            "Reconstructed {} gaussians from {} in {:.2}s",
            written,
            input.display(),
            started.elapsed().as_secs_f32()
        );
        Ok(SplatOutput {
            path,
            gaussians: written,
            _dir: dir,
        })
    }
}

/// A finished splat living in a request-scoped temporary directory. Dropping
/// it deletes the file; [`SplatOutput::persist`] moves it somewhere durable.
#[derive(Debug)]
pub struct SplatOutput {
    path: PathBuf,
    gaussians: usize,
    _dir: TempDir,
}

impl SplatOutput {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn gaussian_count(&self) -> usize {
        self.gaussians
    }

    /// Move the PLY to `destination`, creating parent directories as needed.
    pub fn persist(self, destination: &Path) -> Result<PathBuf> {
        if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| {
                SplatError::processing_with(format!("cannot create {}", parent.display()), err)
            })?;
        }
        if fs::rename(&self.path, destination).is_err() {
            // Cross-device moves fall back to a copy; the temp dir is removed on drop.
            fs::copy(&self.path, destination).map_err(|err| {
                SplatError::processing_with(
                    format!("cannot write {}", destination.display()),
                    err,
                )
            })?;
        }
        debug!("Persisted splat to {}", destination.display());
        Ok(destination.to_path_buf())
    }
}

fn output_stem(input: &Path) -> &str {
    input
        .file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .unwrap_or("splat")
}

fn timed<T>(stage: &str, run: impl FnOnce() -> Result<T>) -> Result<T> {
    let started = Instant::now();
    let result = run();
    debug!(
        "{stage} took {:.1}ms",
        started.elapsed().as_secs_f64() * 1000.0
    );
    result
}
