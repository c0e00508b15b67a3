use anyhow::Result;
use tracing::info;

use crate::config::SplatArgs;

pub fn run_from_args(args: &[String]) -> Result<()> {
    let args = SplatArgs::from_args(args)?;
    let config = args.pipeline_config()?;
    info!(
        "Reconstructing {} (model {})",
        args.image.display(),
        config.model_url
    );
    run(&args, &config)
}

#[cfg(feature = "with-tch")]
fn run(args: &SplatArgs, config: &splat_core::PipelineConfig) -> Result<()> {
    use std::sync::Arc;

    use anyhow::Context;
    use image_ingest::ExifImageLoader;
    use splat_core::{HostProbe, HttpModelStore, Pipeline, torch::TorchScriptLoader};

    let store = Arc::new(HttpModelStore::new()?);
    let pipeline = Pipeline::from_config(
        config,
        store,
        Arc::new(TorchScriptLoader),
        Arc::new(ExifImageLoader),
        &HostProbe {
            verbose: args.verbose,
        },
    )?;

    let output = pipeline
        .process(&args.image)
        .with_context(|| format!("failed to reconstruct {}", args.image.display()))?;
    let count = output.gaussian_count();
    let saved = output.persist(&args.output_path())?;
    info!("Saved {count} gaussians to {}", saved.display());
    println!("{}", saved.display());
    Ok(())
}

#[cfg(not(feature = "with-tch"))]
fn run(_args: &SplatArgs, _config: &splat_core::PipelineConfig) -> Result<()> {
    anyhow::bail!("inference requires libtorch; rebuild with `--features with-tch`")
}
