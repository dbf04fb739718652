//! corral CLI entry point.

use clap::Parser;
use color_eyre::eyre::Result;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use corral::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    let filter = match &cli.log_level {
        Some(level) => EnvFilter::new(format!("corral={}", corral::cli::tracing_level(level))),
        None => EnvFilter::from_default_env().add_directive("corral=info".parse()?),
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .init();

    cli.execute().await
}
