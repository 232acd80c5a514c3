use crate::client::{ClientConfig, TorrentClient};
use crate::error::{LeechError, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser)]
#[command(name = "leech")]
#[command(about = "A download-only BitTorrent client", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download a torrent file
    Download {
        /// Path to the .torrent file
        #[arg(short, long)]
        torrent: PathBuf,

        /// Download directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Port advertised to trackers
        #[arg(short, long)]
        port: Option<u16>,

        /// Maximum number of peers to connect to
        #[arg(short, long)]
        max_peers: Option<usize>,

        /// Seconds before an unanswered block request is re-queued
        #[arg(long)]
        request_timeout: Option<u64>,

        /// TOML configuration file; flags given here override it
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Extra peer to connect to, as HOST:PORT (repeatable)
        #[arg(long = "peer")]
        peers: Vec<String>,
    },

    /// Show information about a torrent file
    Info {
        /// Path to the .torrent file
        torrent: PathBuf,
    },
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    pub async fn run(&self) -> Result<()> {
        match &self.command {
            Commands::Download {
                torrent,
                output,
                port,
                max_peers,
                request_timeout,
                config,
                peers,
            } => {
                let mut config = match config {
                    Some(path) => ClientConfig::load(path).await?,
                    None => ClientConfig::default(),
                };

                if let Some(output) = output {
                    config.download_dir = output.clone();
                }
                if let Some(port) = port {
                    config.listen_port = *port;
                }
                if let Some(max_peers) = max_peers {
                    config.max_peers = *max_peers;
                }
                if let Some(secs) = request_timeout {
                    config.request_timeout_secs = *secs;
                }

                let extra_peers = resolve_peers(peers).await?;

                let client = TorrentClient::new(config);
                client.download(torrent, extra_peers).await?;
            }

            Commands::Info { torrent } => {
                self.show_torrent_info(torrent).await?;
            }
        }

        Ok(())
    }

    async fn show_torrent_info(&self, torrent_path: &Path) -> Result<()> {
        let metainfo = crate::torrent::load_torrent_file(torrent_path).await?;

        println!("Torrent Information");
        println!("==================");
        println!("Name: {}", metainfo.info.name);
        println!("Total Size: {} bytes", metainfo.info.total_length);
        println!("Piece Length: {} bytes", metainfo.info.piece_length);
        println!("Number of Pieces: {}", metainfo.info.piece_count());
        println!("Info Hash: {}", metainfo.info_hash_hex());

        println!("\nTrackers:");
        for tracker in metainfo.trackers() {
            println!("  - {}", tracker);
        }

        println!("\nFiles:");
        for (i, file) in metainfo.info.files.iter().enumerate() {
            println!(
                "  {}: {} ({} bytes)",
                i + 1,
                file.path.join("/"),
                file.length
            );
        }

        Ok(())
    }
}

/// Resolve `HOST:PORT` strings, keeping the first address of each
async fn resolve_peers(peers: &[String]) -> Result<Vec<SocketAddr>> {
    let mut resolved = Vec::with_capacity(peers.len());

    for peer in peers {
        let addr = tokio::net::lookup_host(peer.as_str())
            .await
            .map_err(|e| LeechError::Config(format!("cannot resolve peer '{}': {}", peer, e)))?
            .next()
            .ok_or_else(|| LeechError::Config(format!("no address for peer '{}'", peer)))?;
        info!("Adding peer {} ({})", peer, addr);
        resolved.push(addr);
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_download_flags() {
        let cli = Cli::try_parse_from([
            "leech",
            "download",
            "--torrent",
            "a.torrent",
            "--port",
            "7000",
            "--peer",
            "127.0.0.1:6881",
            "--peer",
            "127.0.0.1:6882",
        ])
        .unwrap();

        match cli.command {
            Commands::Download { port, peers, output, .. } => {
                assert_eq!(port, Some(7000));
                assert_eq!(peers.len(), 2);
                assert!(output.is_none());
            }
            Commands::Info { .. } => panic!("expected download"),
        }
    }

    #[tokio::test]
    async fn test_resolve_peers() {
        let peers = resolve_peers(&["127.0.0.1:6881".to_string()]).await.unwrap();
        assert_eq!(peers, vec!["127.0.0.1:6881".parse::<SocketAddr>().unwrap()]);

        assert!(resolve_peers(&["no-port".to_string()]).await.is_err());
    }
}
