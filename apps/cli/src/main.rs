//! update-crate: create or update the RO-Crate describing a notebook repository.
//!
//! Reads the notebooks in a working directory, merges their embedded metadata
//! with a prior crate and a defaults file, and writes `ro-crate-metadata.json`.

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
