//! Compute backend selection.

use std::fmt;

/// Compute backends in priority order: the first variant wins when available.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ComputeDevice {
    /// NVIDIA GPU through CUDA.
    Cuda,
    /// Apple GPU through Metal Performance Shaders.
    Mps,
    Cpu,
}

impl ComputeDevice {
    pub fn label(self) -> &'static str {
        match self {
            ComputeDevice::Cuda => "cuda",
            ComputeDevice::Mps => "mps",
            ComputeDevice::Cpu => "cpu",
        }
    }

    pub fn is_accelerator(self) -> bool {
        !matches!(self, ComputeDevice::Cpu)
    }
}

impl fmt::Display for ComputeDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Runtime capability checks consulted by [`select_device`].
pub trait DeviceProbe {
    fn cuda_available(&self) -> bool;
    fn mps_available(&self) -> bool;
}

/// Probe the host the process runs on. Without the `with-tch` feature there is
/// no accelerator runtime to talk to and every probe reports `false`.
#[derive(Clone, Copy, Debug, Default)]
pub struct HostProbe {
    pub verbose: bool,
}

impl DeviceProbe for HostProbe {
    #[cfg(feature = "with-tch")]
    fn cuda_available(&self) -> bool {
        let mapped = crate::torch::load_torch_cuda_runtime(self.verbose);
        let available = tch::Cuda::is_available();
        tracing::debug!("CUDA available: {available} ({mapped} libtorch CUDA libraries mapped)");
        available
    }

    #[cfg(not(feature = "with-tch"))]
    fn cuda_available(&self) -> bool {
        false
    }

    #[cfg(feature = "with-tch")]
    fn mps_available(&self) -> bool {
        tch::utils::has_mps()
    }

    #[cfg(not(feature = "with-tch"))]
    fn mps_available(&self) -> bool {
        false
    }
}

/// Return the first available backend of CUDA, MPS, CPU. CPU is the terminal
/// fallback, so this never fails.
pub fn select_device(probe: &dyn DeviceProbe) -> ComputeDevice {
    if probe.cuda_available() {
        ComputeDevice::Cuda
    } else if probe.mps_available() {
        ComputeDevice::Mps
    } else {
        ComputeDevice::Cpu
    }
}
