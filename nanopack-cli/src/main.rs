mod app;

use clap::Parser;
use log::{debug, info};

use crate::app::Cli;

fn main() -> anyhow::Result<()> {
    ctrlc::set_handler(|| {
        eprintln!("\nCancelled.");
        std::process::exit(130);
    })
    .expect("failed to set Ctrl+C handler");

    let cli = Cli::parse();

    // Show nanopack info+ on stderr; --verbose enables debug; RUST_LOG overrides
    let level = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .format_timestamp(None)
        .format_module_path(false)
        .format_target(false)
        .init();

    let options = cli.to_options();
    debug!("input: {}", options.input.display());
    debug!("output: {}", options.output.display());

    let summary = nanopack::pipeline::run(&options)?;

    for (name, length) in &summary.sections {
        debug!("section {name}: {length} bytes");
    }
    info!(
        "{} -> {} ({} bytes, {} types)",
        options.input.display(),
        options.output.display(),
        summary.image_size,
        summary.live_types
    );
    if summary.stub_count > 0 {
        info!("generated {} native stubs", summary.stub_count);
    }

    Ok(())
}
