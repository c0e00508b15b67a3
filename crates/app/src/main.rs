mod cli;
mod config;
mod splat;
mod telemetry;

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    telemetry::init(args.iter().any(|arg| arg == "--verbose"));
    if cli::handle_commands(&args)? {
        return Ok(());
    }

    cli::print_help();
    Ok(())
}
