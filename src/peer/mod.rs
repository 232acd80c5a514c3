pub mod bitfield;
mod connection;
mod link;
mod message;
mod protocol;
mod registry;

pub use connection::{ConnectionStatus, PeerConnection, PeerEvent, ReceiveError};
pub use link::{spawn_link, LinkEvent, SocketEvent};
pub use message::{BlockInfo, PeerMessage};
pub use protocol::{Handshake, HANDSHAKE_LEN, PROTOCOL_STRING};
pub use registry::{PeerEntry, PeerRegistry};

use rand::Rng;

/// Choke and interest flags in both directions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerState {
    /// Whether we are choking the peer
    pub am_choking: bool,
    /// Whether we are interested in the peer
    pub am_interested: bool,
    /// Whether the peer is choking us
    pub peer_choking: bool,
    /// Whether the peer is interested in us
    pub peer_interested: bool,
}

impl Default for PeerState {
    fn default() -> Self {
        Self {
            am_choking: true,
            am_interested: false,
            peer_choking: true,
            peer_interested: false,
        }
    }
}

/// Generate a random peer ID.
/// Format: -LE0001-<12 random alphanumerics>
pub fn generate_peer_id() -> [u8; 20] {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

    let mut peer_id = [0u8; 20];
    peer_id[0..8].copy_from_slice(b"-LE0001-");

    let mut rng = rand::thread_rng();
    for byte in &mut peer_id[8..] {
        *byte = ALPHABET[rng.gen_range(0..ALPHABET.len())];
    }

    peer_id
}
