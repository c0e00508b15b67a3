//! Pipeline configuration: defaults, optional JSON file, environment.

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use tracing::debug;

use crate::unproject::DEFAULT_DEPTH_EPSILON;

/// Published checkpoint of the single-image splat predictor. It is a plain
/// PyTorch state dict, so it has to be exported to TorchScript before the
/// pipeline can load it; there is no usable default model.
pub const PUBLISHED_CHECKPOINT_URL: &str =
    "https://ml-site.cdn-apple.com/models/sharp/sharp_2572gikvuh.pt";

pub const ENV_MODEL_URL: &str = "SPLAT_MODEL_URL";
pub const ENV_CACHE_DIR: &str = "SPLAT_CACHE_DIR";
pub const ENV_DEPTH_EPSILON: &str = "SPLAT_DEPTH_EPSILON";
pub const ENV_FORCE_CPU: &str = "SPLAT_FORCE_CPU";

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// URL or local path of a TorchScript export of the predictor. Required.
    pub model_url: String,
    pub cache_dir: PathBuf,
    /// Depth used for primitives whose predicted depth is not positive.
    pub depth_epsilon: f32,
    pub force_cpu: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model_url: String::new(),
            cache_dir: default_cache_dir(),
            depth_epsilon: DEFAULT_DEPTH_EPSILON,
            force_cpu: false,
        }
    }
}

impl PipelineConfig {
    /// Defaults overlaid with a JSON file. Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Overlay `SPLAT_*` variables read through `lookup`.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = lookup(ENV_MODEL_URL).filter(|v| !v.trim().is_empty()) {
            self.model_url = url;
        }
        if let Some(dir) = lookup(ENV_CACHE_DIR).filter(|v| !v.trim().is_empty()) {
            self.cache_dir = PathBuf::from(dir);
        }
        if let Some(value) = lookup(ENV_DEPTH_EPSILON) {
            self.depth_epsilon = value
                .trim()
                .parse()
                .with_context(|| format!("{ENV_DEPTH_EPSILON} must be a number, got {value:?}"))?;
        }
        if let Some(value) = lookup(ENV_FORCE_CPU) {
            self.force_cpu = parse_flag(&value)
                .ok_or_else(|| anyhow!("{ENV_FORCE_CPU} must be a boolean, got {value:?}"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.model_url.trim().is_empty() {
            bail!(
                "no model configured: pass --model, set {ENV_MODEL_URL} or add model_url to the \
                 config file. It must name a TorchScript export of the predictor; the published \
                 checkpoint {PUBLISHED_CHECKPOINT_URL} is a state dict and has to be exported first"
            );
        }
        if !self.depth_epsilon.is_finite() || self.depth_epsilon <= 0.0 {
            bail!(
                "depth_epsilon must be a positive number, got {}",
                self.depth_epsilon
            );
        }
        Ok(())
    }
}

/// `$HOME/.cache/torch/hub/checkpoints`, the torch hub download cache.
pub fn default_cache_dir() -> PathBuf {
    env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(env::temp_dir)
        .join(".cache")
        .join("torch")
        .join("hub")
        .join("checkpoints")
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}
