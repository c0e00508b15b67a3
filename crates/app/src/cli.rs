use anyhow::Result;

use crate::{config::SPLAT_USAGE, splat};

pub fn handle_commands(args: &[String]) -> Result<bool> {
    match args.get(1).map(|s| s.as_str()) {
        None => Ok(false),
        Some("help" | "--help" | "-h") => {
            print_help();
            Ok(true)
        }
        Some(_) => {
            splat::run_from_args(args)?;
            Ok(true)
        }
    }
}

pub fn print_help() {
    println!("Single-image Gaussian Splat reconstruction:");
    println!(
        "  {SPLAT_USAGE}\n      Predict a metric 3D Gaussian Splat from one photo and save it as PLY."
    );
    println!("  help\n      Show this message.");
    println!();
    println!("Environment:");
    println!("  SPLAT_MODEL_URL, SPLAT_CACHE_DIR, SPLAT_DEPTH_EPSILON, SPLAT_FORCE_CPU");
    println!("      Override the matching configuration keys; flags take precedence.");
    println!("      A model is required: --model, SPLAT_MODEL_URL or model_url in --config.");
    println!("      It must be a TorchScript export; raw PyTorch state dicts cannot be loaded.");
    println!("  RUST_LOG\n      Log filter (default info, debug with --verbose).");
}
