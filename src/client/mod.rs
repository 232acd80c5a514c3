mod config;
pub mod scheduler;

pub use config::ClientConfig;

use crate::error::Result;
use crate::peer::{
    generate_peer_id, spawn_link, LinkEvent, PeerConnection, PeerEvent, PeerRegistry, ReceiveError,
    SocketEvent,
};
use crate::piece::{BlockOutcome, PieceStore};
use crate::storage::Storage;
use crate::torrent::{Metainfo, TorrentInfo};
use crate::tracker::{self, TrackerRequest};
use std::net::SocketAddr;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const SOCKET_EVENT_CAPACITY: usize = 256;

/// Main BitTorrent client
pub struct TorrentClient {
    config: ClientConfig,
    peer_id: [u8; 20],
}

impl TorrentClient {
    pub fn new(config: ClientConfig) -> Self {
        let peer_id = generate_peer_id();
        info!("Client initialized with peer_id: {}", String::from_utf8_lossy(&peer_id));

        Self { config, peer_id }
    }

    /// Download a torrent, using its trackers plus any `extra_peers`
    pub async fn download(&self, torrent_path: &Path, extra_peers: Vec<SocketAddr>) -> Result<()> {
        info!("Starting download for: {}", torrent_path.display());

        let metainfo = crate::torrent::load_torrent_file(torrent_path).await?;
        self.download_metainfo(&metainfo, extra_peers).await
    }

    pub async fn download_metainfo(&self, metainfo: &Metainfo, extra_peers: Vec<SocketAddr>) -> Result<()> {
        info!("Torrent: {}", metainfo.info.name);
        info!("Total size: {} bytes", metainfo.info.total_length);
        info!("Pieces: {}", metainfo.info.piece_count());
        info!("Info hash: {}", metainfo.info_hash_hex());

        self.run(&metainfo.info, metainfo.info_hash, metainfo.trackers(), extra_peers)
            .await
    }

    /// Download `info` to completion
    pub async fn run(
        &self,
        info: &TorrentInfo,
        info_hash: [u8; 20],
        trackers: Vec<String>,
        extra_peers: Vec<SocketAddr>,
    ) -> Result<()> {
        let root = info.content_root(&self.config.download_dir);
        let storage = Storage::create(&root, info).await?;
        let store = PieceStore::new(info, storage);

        let (socket_tx, socket_rx) = mpsc::channel(SOCKET_EVENT_CAPACITY);
        let (peers_tx, peers_rx) = mpsc::channel(16);

        let announcer = if trackers.is_empty() {
            None
        } else {
            let request = TrackerRequest::new(info_hash, self.peer_id, self.config.listen_port, info.total_length);
            Some(tokio::spawn(tracker::announce_loop(
                trackers,
                request,
                self.config.tracker_timeout(),
                self.config.reannounce_interval(),
                peers_tx,
            )))
        };

        let mut session = Session {
            config: &self.config,
            info_hash,
            peer_id: self.peer_id,
            registry: PeerRegistry::new(self.config.max_peers),
            store,
            socket_tx,
            stall_reported: false,
        };

        session.add_candidates(extra_peers);
        let result = session.run(socket_rx, peers_rx).await;

        if let Some(announcer) = announcer {
            announcer.abort();
        }
        session.shutdown();

        result
    }
}

/// Orchestration state for one download. Runs on a single task and is the
/// only writer of piece state and of the peer registry.
struct Session<'a> {
    config: &'a ClientConfig,
    info_hash: [u8; 20],
    peer_id: [u8; 20],
    registry: PeerRegistry,
    store: PieceStore,
    socket_tx: mpsc::Sender<SocketEvent>,
    stall_reported: bool,
}

impl Session<'_> {
    async fn run(
        &mut self,
        mut socket_rx: mpsc::Receiver<SocketEvent>,
        mut peers_rx: mpsc::Receiver<Vec<SocketAddr>>,
    ) -> Result<()> {
        let mut delay = Duration::ZERO;

        while !self.store.is_complete() {
            tokio::select! {
                Some(event) = socket_rx.recv() => self.handle_socket_event(event).await?,
                Some(peers) = peers_rx.recv() => self.add_candidates(peers),
                _ = tokio::time::sleep(delay) => {}
            }

            let now = Instant::now();
            scheduler::sweep_timeouts(&mut self.registry, &mut self.store, now, self.config.request_timeout());
            let outcome = scheduler::run_pass(&mut self.registry, &mut self.store, now);

            // Go again straight away while requests are flowing; otherwise
            // wait for the next socket event or the idle delay.
            delay = if outcome.requested > 0 {
                Duration::ZERO
            } else {
                self.config.idle_delay()
            };

            self.report_stall();
        }

        info!("Download complete: {} pieces", self.store.piece_count());
        Ok(())
    }

    fn add_candidates(&mut self, peers: Vec<SocketAddr>) {
        let added = peers
            .into_iter()
            .filter(|addr| self.registry.add_candidate(*addr))
            .count();

        if added > 0 {
            info!("{} new peer candidates", added);
            self.stall_reported = false;
            self.fill_connections();
        }
    }

    /// Promote candidates until the connection ceiling is reached or every
    /// candidate has been looked at once
    fn fill_connections(&mut self) {
        for _ in 0..self.registry.candidate_count() {
            if self.registry.is_full() {
                break;
            }
            let Some(addr) = self.registry.next_candidate() else {
                break;
            };
            if self.registry.contains(&addr) {
                continue;
            }

            let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
            let mut connection = PeerConnection::new(
                addr,
                self.info_hash,
                self.peer_id,
                self.config.max_requests_per_peer,
                outgoing_tx,
            );
            connection.attach_link(spawn_link(
                addr,
                self.config.connect_timeout(),
                outgoing_rx,
                self.socket_tx.clone(),
            ));

            if let Err(e) = self.registry.promote(connection) {
                debug!("Not connecting to {}: {}", addr, e);
            } else {
                debug!("Connecting to {}", addr);
            }
        }
    }

    async fn handle_socket_event(&mut self, event: SocketEvent) -> Result<()> {
        let SocketEvent { addr, kind } = event;

        let Some(entry) = self.registry.get_mut(&addr) else {
            return Ok(());
        };

        match kind {
            LinkEvent::Connected => entry.connection.on_connected(),
            LinkEvent::Data(data) => match entry.connection.receive(&data) {
                Ok(events) => self.apply_peer_events(&addr, events).await?,
                Err(ReceiveError { events, error }) => {
                    // Blocks that arrived ahead of the bad frame are already
                    // off the connection's queue and must reach the store.
                    self.apply_peer_events(&addr, events).await?;
                    warn!("Dropping {}: {}", addr, error);
                    self.disconnect(&addr);
                }
            },
            LinkEvent::Closed(reason) => {
                match reason {
                    Some(reason) => debug!("Connection to {} closed: {}", addr, reason),
                    None => debug!("Connection to {} closed", addr),
                }
                self.disconnect(&addr);
            }
        }

        Ok(())
    }

    async fn apply_peer_events(&mut self, addr: &SocketAddr, events: Vec<PeerEvent>) -> Result<()> {
        for event in events {
            match event {
                PeerEvent::Connected { .. } => {
                    if self.store.complete_count() > 0 {
                        if let Some(entry) = self.registry.get_mut(addr) {
                            entry.connection.send_bitfield(self.store.bitfield());
                        }
                    }
                }
                PeerEvent::Bitfield(indices) => self.registry.record_bitfield(addr, indices),
                PeerEvent::Block {
                    piece_index,
                    offset,
                    data,
                } => {
                    let outcome = self.store.mark_downloaded(piece_index, offset, &data).await?;
                    if outcome == BlockOutcome::Verified {
                        for connection in self.registry.connections() {
                            connection.announce_have(piece_index);
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Tear down one connection, requeue its requests and refill the slot
    fn disconnect(&mut self, addr: &SocketAddr) {
        let Some(mut entry) = self.registry.remove(addr) else {
            return;
        };

        let cancelled = entry.connection.disconnect();
        for block in &cancelled {
            self.store.mark_needed(*block);
        }

        info!(
            "Disconnected from {} ({} requests cancelled, {} connections left)",
            addr,
            cancelled.len(),
            self.registry.len()
        );

        self.fill_connections();
    }

    fn report_stall(&mut self) {
        if self.stall_reported || !self.registry.is_empty() || self.registry.untried_count() > 0 {
            return;
        }

        warn!(
            "No peers connected and no untried candidates left ({}/{} pieces); waiting for tracker",
            self.store.complete_count(),
            self.store.piece_count()
        );
        self.stall_reported = true;
    }

    fn shutdown(&mut self) {
        for mut entry in self.registry.drain() {
            entry.connection.disconnect();
        }
    }
}
