use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use splat_core::PipelineConfig;

pub const SPLAT_USAGE: &str = "splat <image> --model <torchscript url|path> [--out <path>] \
[--cache-dir <dir>] [--config <json>] [--depth-epsilon <f>] [--cpu] [--verbose]";

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SplatArgs {
    pub image: PathBuf,
    pub out: Option<PathBuf>,
    pub model: Option<String>,
    pub cache_dir: Option<PathBuf>,
    pub config_file: Option<PathBuf>,
    pub depth_epsilon: Option<f32>,
    pub use_cpu: bool,
    pub verbose: bool,
}

impl SplatArgs {
    pub fn from_args(args: &[String]) -> Result<Self> {
        let mut parsed = SplatArgs::default();
        let mut image: Option<PathBuf> = None;

        let mut idx = 1;
        while idx < args.len() {
            match args[idx].as_str() {
                "--out" => {
                    idx += 1;
                    parsed.out = Some(PathBuf::from(value(args, idx, "--out")?));
                    idx += 1;
                }
                "--model" => {
                    idx += 1;
                    parsed.model = Some(value(args, idx, "--model")?.to_string());
                    idx += 1;
                }
                "--cache-dir" => {
                    idx += 1;
                    parsed.cache_dir = Some(PathBuf::from(value(args, idx, "--cache-dir")?));
                    idx += 1;
                }
                "--config" => {
                    idx += 1;
                    parsed.config_file = Some(PathBuf::from(value(args, idx, "--config")?));
                    idx += 1;
                }
                "--depth-epsilon" => {
                    idx += 1;
                    let epsilon = value(args, idx, "--depth-epsilon")?
                        .parse::<f32>()
                        .with_context(|| "--depth-epsilon must be a number".to_string())?;
                    if !epsilon.is_finite() || epsilon <= 0.0 {
                        bail!("--depth-epsilon must be a positive number");
                    }
                    parsed.depth_epsilon = Some(epsilon);
                    idx += 1;
                }
                "--cpu" => {
                    parsed.use_cpu = true;
                    idx += 1;
                }
                "--verbose" => {
                    parsed.verbose = true;
                    idx += 1;
                }
                arg if arg.starts_with('-') => {
                    bail!("Unrecognised flag: {arg}\n\nUsage: {SPLAT_USAGE}");
                }
                other => {
                    if image.is_some() {
                        bail!("Unexpected argument {other:?}\n\nUsage: {SPLAT_USAGE}");
                    }
                    image = Some(PathBuf::from(other));
                    idx += 1;
                }
            }
        }

        parsed.image = image.ok_or_else(|| anyhow!("Missing input image.\n\nUsage: {SPLAT_USAGE}"))?;
        Ok(parsed)
    }

    /// Defaults, then `--config`, then `SPLAT_*` environment, then flags.
    pub fn pipeline_config(&self) -> Result<PipelineConfig> {
        self.pipeline_config_with(|key| std::env::var(key).ok())
    }

    pub fn pipeline_config_with(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<PipelineConfig> {
        let mut config = match &self.config_file {
            Some(path) => PipelineConfig::from_file(path)?,
            None => PipelineConfig::default(),
        };
        config.apply_env_from(lookup)?;

        if let Some(model) = &self.model {
            config.model_url = model.clone();
        }
        if let Some(dir) = &self.cache_dir {
            config.cache_dir = dir.clone();
        }
        if let Some(epsilon) = self.depth_epsilon {
            config.depth_epsilon = epsilon;
        }
        if self.use_cpu {
            config.force_cpu = true;
        }
        config.validate()?;
        Ok(config)
    }

    /// `--out`, or the input path with a `.ply` extension.
    pub fn output_path(&self) -> PathBuf {
        match &self.out {
            Some(out) => out.clone(),
            None => default_output(&self.image),
        }
    }
}

fn value<'a>(args: &'a [String], idx: usize, flag: &str) -> Result<&'a str> {
    args.get(idx)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("{flag} requires a value"))
}

fn default_output(image: &Path) -> PathBuf {
    if image.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("ply")) {
        image.with_extension("splat.ply")
    } else {
        image.with_extension("ply")
    }
}
