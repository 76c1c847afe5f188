//! p2index CLI: build and query P2/OSGi repository indexes.
//!
//! Reads a repository's artifact listing, downloads and verifies every
//! unit, and keeps a persisted capability index per repository.

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
