//! Shim binary that calls into the `tenantgate_coordinator` library's `inner_main`.
use clap::Parser as _;
use eyre::Result;

use tenantgate_coordinator::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    // Delegate to library entrypoint
    tenantgate_coordinator::inner_main(Cli::parse()).await
}
