//! Load-once ownership of the predictor.

use std::{
    path::PathBuf,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    time::Instant,
};

use tracing::{error, info};

use crate::device::ComputeDevice;
use crate::error::{Result, SplatError};
use crate::predictor::{ModelLoader, Predictor};
use crate::store::ModelStore;

/// Where to get the weights and how to turn them into a predictor.
pub struct ModelSource {
    pub identifier: String,
    pub cache_dir: PathBuf,
    pub store: Arc<dyn ModelStore>,
    pub loader: Arc<dyn ModelLoader>,
}

/// Lazily loaded predictor shared by every request of a pipeline.
///
/// The first [`ModelHandle::ensure_loaded`] call fetches and builds the model
/// while holding the handle's lock; concurrent callers block on that lock and
/// then observe the loaded predictor. A failed load leaves the handle empty so
/// a later call can try again.
pub struct ModelHandle {
    source: ModelSource,
    device: ComputeDevice,
    predictor: Mutex<Option<Arc<dyn Predictor>>>,
    loads: AtomicUsize,
}

impl ModelHandle {
    pub fn new(source: ModelSource, device: ComputeDevice) -> Self {
        Self {
            source,
            device,
            predictor: Mutex::new(None),
            loads: AtomicUsize::new(0),
        }
    }

    pub fn device(&self) -> ComputeDevice {
        self.device
    }

    pub fn is_loaded(&self) -> bool {
        self.predictor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Number of successful loads performed by this handle (0 or 1).
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Load the model on first use and return it. Later calls are no-ops.
    pub fn ensure_loaded(&self) -> Result<Arc<dyn Predictor>> {
        let mut slot = self
            .predictor
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(predictor) = slot.as_ref() {
            return Ok(predictor.clone());
        }

        let identifier = &self.source.identifier;
        let _span = tracing::info_span!("model.load", model = %identifier, device = %self.device)
            .entered();
        info!("Loading model...");
        let started = Instant::now();

        let params = self
            .source
            .store
            .fetch(identifier, &self.source.cache_dir)
            .map_err(|source| {
                error!("Failed to fetch model: {source:#}");
                SplatError::ModelUnavailable {
                    identifier: identifier.clone(),
                    source,
                }
            })?;
        let predictor = self
            .source
            .loader
            .load(&params, self.device)
            .map_err(|source| {
                error!("Failed to construct model: {source:#}");
                SplatError::ModelUnavailable {
                    identifier: identifier.clone(),
                    source,
                }
            })?;

        *slot = Some(predictor.clone());
        self.loads.fetch_add(1, Ordering::SeqCst);
        info!(
            "Model loaded on {} in {:.2}s",
            self.device,
            started.elapsed().as_secs_f32()
        );
        Ok(predictor)
    }
}
