mod client;
mod peer;
mod request;
mod response;
mod udp;

pub use client::TrackerClient;
pub use request::{TrackerEvent, TrackerRequest};
pub use response::TrackerResponse;

use rand::seq::SliceRandom;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Announce to every tracker in shuffled order, forward each peer list, then
/// sleep `interval` and go again. Returns once the receiver is dropped.
pub async fn announce_loop(
    mut trackers: Vec<String>,
    mut request: TrackerRequest,
    per_tracker_timeout: Duration,
    interval: Duration,
    peers: mpsc::Sender<Vec<SocketAddr>>,
) {
    let client = TrackerClient::new();

    loop {
        trackers.shuffle(&mut rand::thread_rng());

        for url in &trackers {
            match tokio::time::timeout(per_tracker_timeout, client.announce(url, &request)).await {
                Ok(Ok(response)) => {
                    if response.peers.is_empty() {
                        continue;
                    }
                    if peers.send(response.peers).await.is_err() {
                        return;
                    }
                }
                Ok(Err(e)) => warn!("Tracker {} failed: {}", url, e),
                Err(_) => warn!("Tracker {} timed out after {:?}", url, per_tracker_timeout),
            }
        }

        request.event = None;
        info!("Next announce in {:?}", interval);

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = peers.closed() => return,
        }
    }
}
