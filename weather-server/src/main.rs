//! Binary crate for the `weather-server` service.
//!
//! This crate focuses on:
//! - Parsing CLI arguments
//! - Interactive credential configuration
//! - Serving the aggregator over HTTP

use clap::Parser;

mod cli;
mod error;
mod routes;
mod server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cmd = cli::Cli::parse();
    cmd.run().await
}
