use std::{
    io::Cursor,
    sync::{Arc, Mutex, PoisonError},
};

use anyhow::{anyhow, bail};
use tch::{CModule, Device, Kind, Tensor};
use tracing::debug;

use crate::device::ComputeDevice;
use crate::error::{Result, SplatError};
use crate::gaussians::{GaussianNdc, NDC_CHANNELS};
use crate::predictor::{ModelLoader, Predictor};
use crate::preprocess::ImageTensor;

/// TorchScript module taking `(image [1,3,H,W], disparity_factor [1])` and
/// returning `[1,N,14]` or `[N,14]` Gaussian rows.
///
/// The weights must be a TorchScript archive, i.e. the predictor traced or
/// scripted on `(image, disparity_factor)` and written with `torch.jit.save`.
/// A checkpoint saved with `torch.save(model.state_dict())`, such as the
/// published one, holds bare tensors with no graph and is rejected.
pub struct TorchScriptPredictor {
    module: Mutex<CModule>,
    device: Device,
}

impl TorchScriptPredictor {
    pub fn from_bytes(params: &[u8], device: ComputeDevice) -> anyhow::Result<Self> {
        let device = Device::from(device);
        let mut reader = Cursor::new(params);
        let mut module =
            CModule::load_data_on_device(&mut reader, device).map_err(|err| {
                let err = anyhow::Error::from(err);
                if looks_like_state_dict(params) {
                    err.context(
                        "weights are a PyTorch state dict, not a TorchScript export; \
                         save the predictor with torch.jit.save and point the model at that file",
                    )
                } else {
                    err.context("failed to deserialize TorchScript module")
                }
            })?;
        module.set_eval();
        Ok(Self {
            module: Mutex::new(module),
            device,
        })
    }

    fn run(&self, image: &ImageTensor, disparity_factor: f32) -> anyhow::Result<Vec<GaussianNdc>> {
        let shape = image.shape().map(|d| d as i64);
        let input = Tensor::from_slice(image.as_slice())
            .view(shape)
            .to_device(self.device);
        let disparity = Tensor::from_slice(&[disparity_factor]).to_device(self.device);

        let output = tch::no_grad(|| {
            let module = self.module.lock().unwrap_or_else(PoisonError::into_inner);
            module.forward_ts(&[input, disparity])
        })?;

        let rows = match output.size().as_slice() {
            [1, n, c] | [n, c] if *c == NDC_CHANNELS as i64 => *n,
            other => bail!("unexpected predictor output shape {other:?}"),
        };
        let flat = output
            .to_device(Device::Cpu)
            .to_kind(Kind::Float)
            .contiguous()
            .view([-1]);
        let values = Vec::<f32>::try_from(&flat)?;
        debug!("Predictor returned {rows} gaussians");

        values
            .chunks_exact(NDC_CHANNELS)
            .map(|row| {
                GaussianNdc::from_channels(row).ok_or_else(|| anyhow!("short predictor row"))
            })
            .collect()
    }
}

impl Predictor for TorchScriptPredictor {
    fn infer(&self, image: &ImageTensor, disparity_factor: f32) -> Result<Vec<GaussianNdc>> {
        self.run(image, disparity_factor)
            .map_err(SplatError::InferenceFailed)
    }
}

/// Builds [`TorchScriptPredictor`]s from downloaded weights.
#[derive(Clone, Copy, Debug, Default)]
pub struct TorchScriptLoader;

impl ModelLoader for TorchScriptLoader {
    fn load(&self, params: &[u8], device: ComputeDevice) -> anyhow::Result<Arc<dyn Predictor>> {
        Ok(Arc::new(TorchScriptPredictor::from_bytes(params, device)?))
    }
}

/// `torch.save` and `torch.jit.save` both write zip archives with a
/// `data.pkl` record; only TorchScript adds `constants.pkl` and `code/`.
fn looks_like_state_dict(params: &[u8]) -> bool {
    let has = |needle: &[u8]| params.windows(needle.len()).any(|w| w == needle);
    params.starts_with(b"PK\x03\x04") && has(b"data.pkl") && !has(b"constants.pkl")
}
