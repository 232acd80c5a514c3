use super::{udp, TrackerRequest, TrackerResponse};
use crate::bencode::decode;
use crate::error::{LeechError, Result};
use reqwest::Client;
use tracing::{debug, info};
use url::Url;

/// Client for communicating with BitTorrent trackers over HTTP or UDP
pub struct TrackerClient {
    client: Client,
}

impl TrackerClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    /// Announce to one tracker, picking the transport from the URL scheme
    pub async fn announce(&self, tracker_url: &str, request: &TrackerRequest) -> Result<TrackerResponse> {
        info!("Announcing to tracker: {}", tracker_url);

        let url = Url::parse(tracker_url)?;
        let response = match url.scheme() {
            "udp" => udp::announce(&url, request).await?,
            "http" | "https" => self.announce_http(url, request).await?,
            other => {
                return Err(LeechError::Tracker(format!(
                    "unsupported tracker scheme '{}'",
                    other
                )))
            }
        };

        info!(
            "Received {} peers from tracker (interval: {}s)",
            response.peers.len(),
            response.interval
        );

        Ok(response)
    }

    async fn announce_http(&self, mut url: Url, request: &TrackerRequest) -> Result<TrackerResponse> {
        let query = match url.query() {
            Some(existing) if !existing.is_empty() => format!("{}&{}", existing, request.query_string()),
            _ => request.query_string(),
        };
        url.set_query(Some(&query));

        debug!("Tracker request URL: {}", url);

        let response = self.client.get(url).send().await?;

        let status = response.status();
        let body = response.bytes().await?;

        debug!("Tracker response status: {}, body length: {}", status, body.len());

        if !status.is_success() {
            return Err(LeechError::Tracker(format!("HTTP error: {}", status)));
        }

        TrackerResponse::from_bencode(&decode(&body)?)
    }
}

impl Default for TrackerClient {
    fn default() -> Self {
        Self::new()
    }
}
