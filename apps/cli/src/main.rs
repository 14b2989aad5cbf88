//! SpaceCraft CLI: archive.org content pipeline for the SpaceCraft Unity app.
//!
//! Imports archive.org collections into a local cache and exports them,
//! with custom overlays applied, into Unity's StreamingAssets.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
