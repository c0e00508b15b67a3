#![allow(dead_code)]

use std::{
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use image::{Rgb, RgbImage};
use image_ingest::ExifImageLoader;
use splat_core::{
    ComputeDevice, GaussianNdc, ImageTensor, ModelHandle, ModelLoader, ModelSource, ModelStore,
    Pipeline, Predictor, SplatError,
};

/// Deterministic batch: a grid of primitives at varying disparity, with one
/// degenerate (zero) disparity at the end.
pub fn fixture_batch(n: usize) -> Vec<GaussianNdc> {
    (0..n)
        .map(|i| {
            let t = i as f32 / n.max(1) as f32;
            let z = if i + 1 == n { 0.0 } else { 0.2 + 0.8 * t };
            GaussianNdc {
                position: [2.0 * t - 1.0, 1.0 - 2.0 * t, z],
                log_scale: [-6.0, -6.5, -7.0],
                rotation: [1.0, 0.0, 0.0, 0.0],
                opacity: 0.1 + 0.8 * t,
                color: [t, 0.5, 1.0 - t],
            }
        })
        .collect()
}

#[derive(Default)]
pub struct FixturePredictor {
    pub count: usize,
    pub fail: bool,
    pub calls: Mutex<Vec<(usize, usize, f32)>>,
}

impl Predictor for FixturePredictor {
    fn infer(&self, image: &ImageTensor, disparity_factor: f32) -> splat_core::Result<Vec<GaussianNdc>> {
        self.calls
            .lock()
            .unwrap()
            .push((image.width(), image.height(), disparity_factor));
        if self.fail {
            return Err(SplatError::InferenceFailed(anyhow::anyhow!("fixture failure")));
        }
        Ok(fixture_batch(self.count))
    }
}

pub struct FixtureStore {
    pub fetches: AtomicUsize,
    pub available: bool,
}

impl ModelStore for FixtureStore {
    fn fetch(&self, _identifier: &str, _cache_dir: &Path) -> anyhow::Result<Vec<u8>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if !self.available {
            anyhow::bail!("model server unreachable");
        }
        Ok(b"weights".to_vec())
    }
}

pub struct FixtureLoader {
    pub predictor: Arc<FixturePredictor>,
    pub builds: AtomicUsize,
}

impl ModelLoader for FixtureLoader {
    fn load(&self, params: &[u8], _device: ComputeDevice) -> anyhow::Result<Arc<dyn Predictor>> {
        anyhow::ensure!(params == b"weights", "unexpected parameter blob");
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(self.predictor.clone())
    }
}

pub struct Harness {
    pub pipeline: Pipeline,
    pub predictor: Arc<FixturePredictor>,
    pub store: Arc<FixtureStore>,
    pub loader: Arc<FixtureLoader>,
}

pub fn harness(predictor: FixturePredictor, store_available: bool) -> Harness {
    let predictor = Arc::new(predictor);
    let store = Arc::new(FixtureStore {
        fetches: AtomicUsize::new(0),
        available: store_available,
    });
    let loader = Arc::new(FixtureLoader {
        predictor: predictor.clone(),
        builds: AtomicUsize::new(0),
    });
    let source = ModelSource {
        identifier: "fixture://model".to_string(),
        cache_dir: std::env::temp_dir(),
        store: store.clone(),
        loader: loader.clone(),
    };
    let handle = ModelHandle::new(source, ComputeDevice::Cpu);
    Harness {
        pipeline: Pipeline::new(handle, Arc::new(ExifImageLoader), 1e-4),
        predictor,
        store,
        loader,
    }
}

/// Write a small gradient PNG (no EXIF, so the 30mm fallback applies).
pub fn write_photo(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 255 / width.max(1)) as u8, (y * 255 / height.max(1)) as u8, 128])
    });
    let path = dir.join(name);
    img.save(&path).unwrap();
    path
}
