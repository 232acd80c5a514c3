mod bencode;
mod cli;
mod client;
mod error;
mod peer;
mod piece;
mod storage;
mod torrent;
mod tracker;

use anyhow::Result;
use cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG overrides the INFO default
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    cli.run().await?;

    Ok(())
}
