//! Echo client binary.
//!
//! Reads standard input to end-of-file, sends the collected bytes to the
//! server as a single message, and prints the echoed payload.

use anyhow::Context;
use clap::Parser;
use moorage::EchoClient;
use tokio::io::AsyncReadExt;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "echo-client", version, author)]
/// A client for the echo server.
struct Cli {
    /// Host to connect to.
    host: String,
    /// Port to connect to.
    port: u16,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let mut client = EchoClient::connect((cli.host.as_str(), cli.port))
        .await
        .with_context(|| format!("failed to connect to {}:{}", cli.host, cli.port))?;

    let mut input = Vec::new();
    tokio::io::stdin()
        .read_to_end(&mut input)
        .await
        .context("failed to read standard input")?;

    let echoed = client
        .roundtrip(&input)
        .await
        .context("echo roundtrip failed")?;
    println!("{}", String::from_utf8_lossy(&echoed));

    Ok(())
}
