//! One scheduling pass: give back timed-out requests, then pair each free
//! peer with the first block it can serve.

use crate::peer::PeerRegistry;
use crate::piece::PieceStore;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassOutcome {
    /// Peers that were free when the pass started
    pub eligible: usize,
    /// Requests sent during the pass
    pub requested: usize,
}

/// Return every request older than `timeout` to the store
pub fn sweep_timeouts(
    registry: &mut PeerRegistry,
    store: &mut PieceStore,
    now: Instant,
    timeout: Duration,
) -> usize {
    let mut expired = 0;

    for connection in registry.connections_mut() {
        for block in connection.expire_requests(now, timeout) {
            store.mark_needed(block);
            expired += 1;
        }
    }

    expired
}

/// Visit free peers in registry order and send at most one request to each
pub fn run_pass(registry: &mut PeerRegistry, store: &mut PieceStore, now: Instant) -> PassOutcome {
    let eligible = registry.eligible_peers();
    let mut outcome = PassOutcome {
        eligible: eligible.len(),
        requested: 0,
    };

    for addr in eligible {
        let Some(entry) = registry.get_mut(&addr) else {
            continue;
        };
        let Some(bitfield) = entry.bitfield.as_deref() else {
            continue;
        };
        let Some(piece_index) = store.piece_needed(bitfield) else {
            continue;
        };
        let Some(block) = store.block_needed(piece_index) else {
            continue;
        };

        if entry.connection.has_capacity() {
            entry.connection.request_block(block, now);
            store.mark_requested(piece_index, block);
            outcome.requested += 1;
        } else {
            debug!("{} filled up during this pass", addr);
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::bitfield::encode_bitfield;
    use crate::peer::{BlockInfo, Handshake, PeerConnection, PeerMessage};
    use crate::piece::BLOCK_SIZE;
    use crate::storage::Storage;
    use crate::torrent::{FileInfo, PieceHash, Pieces, TorrentInfo};
    use bytes::Bytes;
    use std::net::SocketAddr;
    use std::path::Path;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    const INFO_HASH: [u8; 20] = [4u8; 20];

    fn store(pieces: usize, piece_length: u64) -> PieceStore {
        let info = TorrentInfo::new(
            "t".to_string(),
            piece_length,
            Pieces::from(vec![PieceHash::new([0u8; 20]); pieces]),
            vec![FileInfo {
                path: vec!["t".to_string()],
                length: pieces as u64 * piece_length,
            }],
        )
        .unwrap();
        PieceStore::new(&info, Storage::layout(Path::new("/x"), &info))
    }

    /// Registered peer that handshook and advertised `pieces`
    fn add_peer(
        registry: &mut PeerRegistry,
        port: u16,
        pieces: &[u32],
        unchoke: bool,
    ) -> (SocketAddr, UnboundedReceiver<Bytes>) {
        let addr = SocketAddr::from(([10, 0, 0, 2], port));
        let (tx, rx) = mpsc::unbounded_channel();
        let mut conn = PeerConnection::new(addr, INFO_HASH, [1u8; 20], 5, tx);
        conn.on_connected();

        let mut bytes = Handshake::new(INFO_HASH, [2u8; 20]).encode().to_vec();
        bytes.extend_from_slice(
            &PeerMessage::Bitfield {
                bitfield: Bytes::from(encode_bitfield(pieces.iter().copied(), 64)),
            }
            .encode(),
        );
        if unchoke {
            bytes.extend_from_slice(&PeerMessage::Unchoke.encode());
        }
        conn.receive(&bytes).unwrap();

        registry.promote(conn).unwrap();
        registry.record_bitfield(&addr, pieces.to_vec());
        (addr, rx)
    }

    fn requests(rx: &mut UnboundedReceiver<Bytes>) -> Vec<BlockInfo> {
        let mut found = Vec::new();
        while let Ok(bytes) = rx.try_recv() {
            if let Ok(PeerMessage::Request { block }) = PeerMessage::decode(bytes.slice(4..)) {
                found.push(block);
            }
        }
        found
    }

    #[test]
    fn test_choked_peer_gets_nothing() {
        let mut registry = PeerRegistry::new(50);
        let mut store = store(2, BLOCK_SIZE as u64);
        let (_, mut rx) = add_peer(&mut registry, 1, &[0, 1], false);

        let outcome = run_pass(&mut registry, &mut store, Instant::now());

        assert_eq!(outcome, PassOutcome::default());
        assert!(requests(&mut rx).is_empty());
        assert_eq!(store.block_needed(0), Some(BlockInfo::new(0, 0, BLOCK_SIZE)));
    }

    #[test]
    fn test_one_request_per_peer_per_pass() {
        let mut registry = PeerRegistry::new(50);
        let mut store = store(2, 4 * BLOCK_SIZE as u64);
        let (_, mut first) = add_peer(&mut registry, 1, &[0, 1], true);
        let (_, mut second) = add_peer(&mut registry, 2, &[1], true);

        let outcome = run_pass(&mut registry, &mut store, Instant::now());
        assert_eq!(outcome.eligible, 2);
        assert_eq!(outcome.requested, 2);

        assert_eq!(requests(&mut first), vec![BlockInfo::new(0, 0, BLOCK_SIZE)]);
        assert_eq!(requests(&mut second), vec![BlockInfo::new(1, 0, BLOCK_SIZE)]);
    }

    #[test]
    fn test_peer_with_five_outstanding_is_excluded() {
        let mut registry = PeerRegistry::new(50);
        let mut store = store(2, 8 * BLOCK_SIZE as u64);
        let (addr, mut rx) = add_peer(&mut registry, 1, &[0, 1], true);
        let now = Instant::now();

        for _ in 0..5 {
            assert_eq!(run_pass(&mut registry, &mut store, now).requested, 1);
        }
        assert_eq!(requests(&mut rx).len(), 5);

        let outcome = run_pass(&mut registry, &mut store, now);
        assert_eq!(outcome, PassOutcome::default());
        assert!(registry.eligible_peers().is_empty());

        // a timeout frees a slot and the block is handed out again
        let timeout = Duration::from_secs(5);
        assert_eq!(sweep_timeouts(&mut registry, &mut store, now + timeout, timeout), 5);
        assert_eq!(registry.eligible_peers(), vec![addr]);

        run_pass(&mut registry, &mut store, now + timeout);
        assert_eq!(requests(&mut rx), vec![BlockInfo::new(0, 0, BLOCK_SIZE)]);
    }

    #[test]
    fn test_peer_without_needed_pieces_is_skipped() {
        let mut registry = PeerRegistry::new(50);
        let mut store = store(1, BLOCK_SIZE as u64);
        let (_, mut rx) = add_peer(&mut registry, 1, &[5, 9], true);

        let outcome = run_pass(&mut registry, &mut store, Instant::now());
        assert_eq!(outcome.eligible, 1);
        assert_eq!(outcome.requested, 0);
        assert!(requests(&mut rx).is_empty());
    }
}
