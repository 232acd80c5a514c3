use crate::error::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for the download client. Every field has a default, so a
/// TOML file only needs the keys it changes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    pub download_dir: PathBuf,
    pub listen_port: u16,
    pub max_peers: usize,
    pub max_requests_per_peer: usize,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub idle_delay_ms: u64,
    pub tracker_timeout_secs: u64,
    pub reannounce_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("./downloads"),
            listen_port: 6881,
            max_peers: 50,
            max_requests_per_peer: 5,
            request_timeout_secs: 20,
            connect_timeout_secs: 10,
            idle_delay_ms: 50,
            tracker_timeout_secs: 5,
            reannounce_secs: 300,
        }
    }
}

impl ClientConfig {
    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn idle_delay(&self) -> Duration {
        Duration::from_millis(self.idle_delay_ms)
    }

    pub fn tracker_timeout(&self) -> Duration {
        Duration::from_secs(self.tracker_timeout_secs)
    }

    pub fn reannounce_interval(&self) -> Duration {
        Duration::from_secs(self.reannounce_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ClientConfig::from_toml("max_peers = 10\nrequest_timeout_secs = 5\n").unwrap();

        assert_eq!(config.max_peers, 10);
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.max_requests_per_peer, 5);
        assert_eq!(config.download_dir, PathBuf::from("./downloads"));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        assert!(ClientConfig::from_toml("max_peer = 10").is_err());
    }
}
