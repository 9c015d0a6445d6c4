//! Command-line entry point: `tick-pipeline [TICKS]`
//!
//! Runs one pipeline with the built-in stages, prints progress while it runs
//! and the statistics block when it is done.

use std::path::PathBuf;
use tick_pipeline::config::{DEFAULT_LOG_PATH, LOG_PATH_ENV};
use tick_pipeline::{parse_ticks, PipelineBuilder};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tick_pipeline=info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let ticks = parse_ticks(std::env::args().nth(1).as_deref());
    let log_path = std::env::var_os(LOG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_PATH));

    println!("Tick Pipeline");
    println!("=============");
    println!("Configuration: {ticks} ticks per stage");
    println!();

    let running = PipelineBuilder::new()
        .ticks(ticks)
        .log_path(&log_path)
        .build()?
        .start()?;

    // Ends when the last stage thread drops its sender
    for event in running.progress().iter() {
        println!("{event}");
    }

    let report = running.wait()?;

    println!();
    println!("{report}");
    println!();
    println!("Log written to: {}", log_path.display());
    Ok(())
}
