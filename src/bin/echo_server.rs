//! Echo server binary.
//!
//! Starts the server framework on the given port with the bundled echo
//! handler. Shut it down with ctrl-c or by closing standard input; either
//! way the server drains every live connection before exiting.

use anyhow::Context;
use clap::Parser;
use moorage::echo;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "echo-server", version, author)]
/// A TCP echo server with graceful shutdown.
struct Cli {
    /// Port to listen on.
    port: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    moorage::run(&cli.port, echo::echo)
        .await
        .context("failed to start the echo server")?;

    Ok(())
}
