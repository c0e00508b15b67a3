use std::{
    env,
    path::{Path, PathBuf},
    sync::OnceLock,
};

use libloading::os::unix::{Library, RTLD_GLOBAL, RTLD_NOW};
use tracing::{debug, warn};

const CUDA_LIBRARIES: [&str; 3] = [
    "libtorch_cuda.so",
    "libtorch_cuda_cu.so",
    "libtorch_cuda_cpp.so",
];

/// Open libtorch's CUDA libraries with `RTLD_GLOBAL` once per process so
/// `tch::Cuda::is_available` can see the kernels. `$LIBTORCH/lib` is tried
/// before the linker search path. Returns how many libraries are mapped;
/// later calls report the first result.
pub fn load_torch_cuda_runtime(verbose: bool) -> usize {
    static LOADED: OnceLock<usize> = OnceLock::new();
    *LOADED.get_or_init(|| {
        let libtorch = env::var_os("LIBTORCH").map(PathBuf::from);
        let mut handles = Vec::new();
        for lib in CUDA_LIBRARIES {
            let mut last_err = None;
            for candidate in candidates(lib, libtorch.as_deref()) {
                match unsafe { Library::open(Some(&candidate), RTLD_NOW | RTLD_GLOBAL) } {
                    Ok(handle) => {
                        debug!("Loaded {}", candidate.display());
                        handles.push(handle);
                        last_err = None;
                        break;
                    }
                    Err(err) => last_err = Some(err),
                }
            }
            match last_err {
                Some(err) if verbose => warn!("Failed to load {lib}: {err}"),
                Some(err) => debug!("Failed to load {lib}: {err}"),
                None => {}
            }
        }
        let loaded = handles.len();
        // Libraries stay mapped for the life of the process.
        Box::leak(Box::new(handles));
        loaded
    })
}

fn candidates(lib: &str, libtorch: Option<&Path>) -> Vec<PathBuf> {
    libtorch
        .map(|root| root.join("lib").join(lib))
        .into_iter()
        .chain(std::iter::once(PathBuf::from(lib)))
        .collect()
}
