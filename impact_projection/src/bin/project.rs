//! Projection runner
//!
//! Runs every batch described by a TOML configuration file.
//!
//! Usage:
//!   cargo run --release --bin project -- runs/mortality.toml
//!
//! Set `RUST_LOG=debug` for per-region detail.

use std::env;
use std::process;

use anyhow::{Context, Result};
use impact_projection::{run_projection, ProjectionConfig};
use log::info;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        eprintln!("Usage: {} <run_config.toml>", args[0]);
        eprintln!("Example: {} runs/mortality.toml", args[0]);
        process::exit(1);
    }

    let config_path = &args[1];
    info!("Loading run config: {config_path}");
    let config = ProjectionConfig::from_path(config_path)
        .with_context(|| format!("loading {config_path}"))?;

    let summary = run_projection(&config).context("running projection")?;

    println!(
        "{}: {} completed, {} skipped, {} failed",
        summary.name, summary.completed, summary.skipped, summary.failed
    );
    if summary.failed > 0 {
        process::exit(2);
    }
    Ok(())
}
