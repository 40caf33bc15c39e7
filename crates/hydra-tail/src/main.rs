#![warn(missing_docs)]

//! `hydra-tail`: follow realtime channels from a terminal.

use anyhow::Result;
use clap::Parser;
use hydra_tail::cli::Cli;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    tracing::debug!(?cli, "hydra-tail starting");
    cli.run().await
}
