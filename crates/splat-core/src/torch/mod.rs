//! libtorch backend: TorchScript predictor and CUDA runtime loading.

mod predictor;
mod runtime;

pub use predictor::{TorchScriptLoader, TorchScriptPredictor};
pub use runtime::load_torch_cuda_runtime;

use crate::device::ComputeDevice;

impl From<ComputeDevice> for tch::Device {
    fn from(device: ComputeDevice) -> Self {
        match device {
            ComputeDevice::Cuda => tch::Device::Cuda(0),
            ComputeDevice::Mps => tch::Device::Mps,
            ComputeDevice::Cpu => tch::Device::Cpu,
        }
    }
}
