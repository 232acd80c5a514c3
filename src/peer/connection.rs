use super::bitfield::decode_bitfield;
use super::{BlockInfo, Handshake, PeerMessage, PeerState, HANDSHAKE_LEN};
use crate::error::{LeechError, Result};
use bytes::{Buf, Bytes, BytesMut};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Largest frame accepted from a peer. A block message is 16 KiB plus a
/// header; a bitfield for a very large torrent can run to a few hundred
/// KiB. Anything bigger is treated as corrupt framing.
const MAX_FRAME_LEN: usize = 2 * 1024 * 1024;

/// Lifecycle of one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Handshaking,
    Active,
    Disconnected,
}

/// Something the owner of a connection has to act on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// Handshake accepted; the connection is now active
    Connected { peer_id: [u8; 20] },
    /// The peer advertised which pieces it has
    Bitfield(Vec<u32>),
    /// Block data arrived
    Block {
        piece_index: u32,
        offset: u32,
        data: Bytes,
    },
}

/// A protocol violation, with the events that completed before it
#[derive(Debug, Error)]
#[error("{error}")]
pub struct ReceiveError {
    pub events: Vec<PeerEvent>,
    pub error: LeechError,
}

#[derive(Debug, Clone, Copy)]
struct PendingRequest {
    block: BlockInfo,
    sent_at: Instant,
}

/// Protocol state for one remote peer.
///
/// Bytes read off the socket are pushed in through [`receive`](Self::receive)
/// and framed here; everything this side sends goes out through the
/// `outgoing` channel to the socket task. Dropping that channel closes the
/// socket.
pub struct PeerConnection {
    addr: SocketAddr,
    info_hash: [u8; 20],
    our_peer_id: [u8; 20],
    remote_peer_id: Option<[u8; 20]>,
    status: ConnectionStatus,
    state: PeerState,
    bitfield_received: bool,
    max_requests: usize,
    requested: VecDeque<PendingRequest>,
    buffer: BytesMut,
    outgoing: Option<UnboundedSender<Bytes>>,
    link: Option<JoinHandle<()>>,
}

impl PeerConnection {
    pub fn new(
        addr: SocketAddr,
        info_hash: [u8; 20],
        our_peer_id: [u8; 20],
        max_requests: usize,
        outgoing: UnboundedSender<Bytes>,
    ) -> Self {
        Self {
            addr,
            info_hash,
            our_peer_id,
            remote_peer_id: None,
            status: ConnectionStatus::Connecting,
            state: PeerState::default(),
            bitfield_received: false,
            max_requests,
            requested: VecDeque::new(),
            buffer: BytesMut::new(),
            outgoing: Some(outgoing),
            link: None,
        }
    }

    /// Attach the socket task so it is aborted on disconnect
    pub fn attach_link(&mut self, link: JoinHandle<()>) {
        self.link = Some(link);
    }

    /// The TCP connect finished: open with our handshake
    pub fn on_connected(&mut self) {
        if self.status != ConnectionStatus::Connecting {
            return;
        }

        let handshake = Handshake::new(self.info_hash, self.our_peer_id);
        self.send_raw(Bytes::copy_from_slice(&handshake.encode()));
        self.status = ConnectionStatus::Handshaking;

        debug!("Sent handshake to {}", self.addr);
    }

    /// Feed bytes read from the socket. Returns every event the bytes
    /// completed, in arrival order. An error means the peer broke the
    /// protocol and must be disconnected; it still carries the events
    /// completed before the bad frame, and those must be applied first.
    pub fn receive(&mut self, data: &[u8]) -> std::result::Result<Vec<PeerEvent>, ReceiveError> {
        let mut events = Vec::new();
        if self.status == ConnectionStatus::Disconnected {
            return Ok(events);
        }

        self.buffer.extend_from_slice(data);

        match self.read_frames(&mut events) {
            Ok(()) => Ok(events),
            Err(error) => Err(ReceiveError { events, error }),
        }
    }

    fn read_frames(&mut self, events: &mut Vec<PeerEvent>) -> Result<()> {
        loop {
            match self.status {
                ConnectionStatus::Handshaking => {
                    if self.buffer.len() < HANDSHAKE_LEN {
                        break;
                    }
                    let raw = self.buffer.split_to(HANDSHAKE_LEN);
                    events.push(self.accept_handshake(&raw)?);
                }
                ConnectionStatus::Active => {
                    if self.buffer.len() < 4 {
                        break;
                    }

                    let length = u32::from_be_bytes([
                        self.buffer[0],
                        self.buffer[1],
                        self.buffer[2],
                        self.buffer[3],
                    ]) as usize;

                    if length == 0 {
                        self.buffer.advance(4);
                        continue;
                    }
                    if length > MAX_FRAME_LEN {
                        return Err(LeechError::Peer(format!(
                            "{} sent a {} byte frame",
                            self.addr, length
                        )));
                    }
                    if self.buffer.len() < length + 4 {
                        break;
                    }

                    self.buffer.advance(4);
                    let frame = self.buffer.split_to(length).freeze();
                    let message = PeerMessage::decode(frame)?;
                    if let Some(event) = self.handle_message(message) {
                        events.push(event);
                    }
                }
                ConnectionStatus::Connecting => {
                    return Err(LeechError::Peer(format!(
                        "{} sent data before the connection was established",
                        self.addr
                    )));
                }
                ConnectionStatus::Disconnected => break,
            }
        }

        Ok(())
    }

    fn accept_handshake(&mut self, raw: &[u8]) -> Result<PeerEvent> {
        let handshake = Handshake::decode(raw)?;

        if handshake.info_hash != self.info_hash {
            return Err(LeechError::HandshakeMismatch {
                expected: hex::encode(self.info_hash),
                received: hex::encode(handshake.info_hash),
            });
        }

        self.status = ConnectionStatus::Active;
        self.remote_peer_id = Some(handshake.peer_id);
        info!("Handshake accepted by {}", self.addr);

        Ok(PeerEvent::Connected {
            peer_id: handshake.peer_id,
        })
    }

    fn handle_message(&mut self, message: PeerMessage) -> Option<PeerEvent> {
        match message {
            PeerMessage::KeepAlive => None,
            PeerMessage::Choke => {
                debug!("{} choked us", self.addr);
                self.state.peer_choking = true;
                None
            }
            PeerMessage::Unchoke => {
                debug!("{} unchoked us", self.addr);
                self.state.peer_choking = false;
                None
            }
            PeerMessage::Interested => {
                debug!("{} is interested", self.addr);
                self.state.peer_interested = true;
                None
            }
            PeerMessage::NotInterested => {
                debug!("{} is not interested", self.addr);
                self.state.peer_interested = false;
                None
            }
            // Single availability updates cannot be verified and are not tracked
            PeerMessage::Have { piece_index } => {
                debug!("{} has piece {}", self.addr, piece_index);
                None
            }
            PeerMessage::Bitfield { bitfield } => {
                let indices = decode_bitfield(&bitfield);
                debug!("{} advertised {} pieces", self.addr, indices.len());

                self.bitfield_received = true;
                self.send_interested();

                Some(PeerEvent::Bitfield(indices))
            }
            PeerMessage::Request { block } => {
                debug!(
                    "{} requested piece {} offset {} length {}, uploading is not supported",
                    self.addr, block.piece_index, block.offset, block.length
                );
                None
            }
            PeerMessage::Piece {
                piece_index,
                offset,
                data,
            } => {
                self.requested
                    .retain(|r| !(r.block.piece_index == piece_index && r.block.offset == offset));

                debug!(
                    "Received block piece {} offset {} ({} bytes) from {}",
                    piece_index,
                    offset,
                    data.len(),
                    self.addr
                );

                Some(PeerEvent::Block {
                    piece_index,
                    offset,
                    data,
                })
            }
            PeerMessage::Unknown { id } => {
                debug!("Ignoring message id {} from {}", id, self.addr);
                None
            }
        }
    }

    /// True when a new block request may be sent to this peer
    pub fn is_free(&self) -> bool {
        self.status == ConnectionStatus::Active
            && !self.state.peer_choking
            && self.bitfield_received
            && self.requested.len() < self.max_requests
    }

    pub fn has_capacity(&self) -> bool {
        self.requested.len() < self.max_requests
    }

    /// Send a request and start its timeout clock. The caller checks
    /// [`is_free`](Self::is_free) first.
    pub fn request_block(&mut self, block: BlockInfo, now: Instant) {
        self.send(&PeerMessage::Request { block });
        self.requested.push_back(PendingRequest { block, sent_at: now });

        debug!(
            "Requested piece {} offset {} from {} ({} outstanding)",
            block.piece_index,
            block.offset,
            self.addr,
            self.requested.len()
        );
    }

    /// Remove and return every request older than `timeout`
    pub fn expire_requests(&mut self, now: Instant, timeout: Duration) -> Vec<BlockInfo> {
        let mut expired = Vec::new();

        self.requested.retain(|r| {
            if now.saturating_duration_since(r.sent_at) >= timeout {
                expired.push(r.block);
                false
            } else {
                true
            }
        });

        for block in &expired {
            warn!(
                "Request for piece {} offset {} to {} timed out",
                block.piece_index, block.offset, self.addr
            );
        }

        expired
    }

    pub fn announce_have(&self, piece_index: u32) {
        if self.status == ConnectionStatus::Active {
            self.send(&PeerMessage::Have { piece_index });
        }
    }

    pub fn send_bitfield(&self, bitfield: Vec<u8>) {
        self.send(&PeerMessage::Bitfield {
            bitfield: Bytes::from(bitfield),
        });
    }

    fn send_interested(&mut self) {
        self.send(&PeerMessage::Interested);
        self.state.am_interested = true;
    }

    /// Close the connection. Returns the requests that were still in
    /// flight so their blocks can be handed out again; a second call
    /// returns nothing.
    pub fn disconnect(&mut self) -> Vec<BlockInfo> {
        if self.status == ConnectionStatus::Disconnected {
            return Vec::new();
        }

        self.status = ConnectionStatus::Disconnected;
        self.outgoing = None;
        self.buffer.clear();
        if let Some(link) = self.link.take() {
            link.abort();
        }

        self.requested.drain(..).map(|r| r.block).collect()
    }

    fn send(&self, message: &PeerMessage) {
        self.send_raw(message.encode());
    }

    fn send_raw(&self, bytes: Bytes) {
        if let Some(outgoing) = &self.outgoing {
            // A closed channel means the socket task is gone and its close
            // event is already on the way.
            if outgoing.send(bytes).is_err() {
                debug!("Socket to {} already closed", self.addr);
            }
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn state(&self) -> &PeerState {
        &self.state
    }

    pub fn outstanding(&self) -> usize {
        self.requested.len()
    }

    pub fn remote_peer_id(&self) -> Option<&[u8; 20]> {
        self.remote_peer_id.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::bitfield::encode_bitfield;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    const INFO_HASH: [u8; 20] = [9u8; 20];

    fn connection() -> (PeerConnection, UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let addr: SocketAddr = "10.0.0.1:6881".parse().unwrap();
        (PeerConnection::new(addr, INFO_HASH, [1u8; 20], 5, tx), rx)
    }

    fn drain(rx: &mut UnboundedReceiver<Bytes>) -> Vec<Bytes> {
        let mut sent = Vec::new();
        while let Ok(bytes) = rx.try_recv() {
            sent.push(bytes);
        }
        sent
    }

    /// Connection that has finished the handshake
    fn active() -> (PeerConnection, UnboundedReceiver<Bytes>) {
        let (mut conn, mut rx) = connection();
        conn.on_connected();
        let events = conn
            .receive(&Handshake::new(INFO_HASH, [2u8; 20]).encode())
            .unwrap();
        assert_eq!(events, vec![PeerEvent::Connected { peer_id: [2u8; 20] }]);
        drain(&mut rx);
        (conn, rx)
    }

    /// Active, unchoked, with a bitfield for pieces 0 and 1
    fn ready() -> (PeerConnection, UnboundedReceiver<Bytes>) {
        let (mut conn, mut rx) = active();
        let mut bytes = PeerMessage::Bitfield {
            bitfield: Bytes::from(encode_bitfield([0, 1], 2)),
        }
        .encode()
        .to_vec();
        bytes.extend_from_slice(&PeerMessage::Unchoke.encode());
        conn.receive(&bytes).unwrap();
        drain(&mut rx);
        (conn, rx)
    }

    #[test]
    fn test_sends_handshake_on_connect() {
        let (mut conn, mut rx) = connection();
        assert_eq!(conn.status(), ConnectionStatus::Connecting);

        conn.on_connected();
        assert_eq!(conn.status(), ConnectionStatus::Handshaking);

        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].len(), HANDSHAKE_LEN);
        assert_eq!(&sent[0][28..48], &INFO_HASH);
    }

    #[test]
    fn test_handshake_split_across_reads() {
        let (mut conn, _rx) = connection();
        conn.on_connected();

        let handshake = Handshake::new(INFO_HASH, [2u8; 20]).encode();
        assert!(conn.receive(&handshake[..30]).unwrap().is_empty());
        assert_eq!(conn.status(), ConnectionStatus::Handshaking);

        let events = conn.receive(&handshake[30..]).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(conn.status(), ConnectionStatus::Active);
        assert_eq!(conn.remote_peer_id(), Some(&[2u8; 20]));
    }

    #[test]
    fn test_handshake_info_hash_mismatch() {
        let (mut conn, _rx) = connection();
        conn.on_connected();

        let result = conn.receive(&Handshake::new([3u8; 20], [2u8; 20]).encode());
        assert!(matches!(
            result,
            Err(ReceiveError {
                error: LeechError::HandshakeMismatch { .. },
                ..
            })
        ));
    }

    #[test]
    fn test_handshake_and_messages_in_one_read() {
        let (mut conn, mut rx) = connection();
        conn.on_connected();
        drain(&mut rx);

        let mut bytes = Handshake::new(INFO_HASH, [2u8; 20]).encode().to_vec();
        bytes.extend_from_slice(&PeerMessage::KeepAlive.encode());
        bytes.extend_from_slice(
            &PeerMessage::Bitfield {
                bitfield: Bytes::from_static(&[0b1100_0000]),
            }
            .encode(),
        );
        bytes.extend_from_slice(&PeerMessage::Unchoke.encode());

        let events = conn.receive(&bytes).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], PeerEvent::Bitfield(vec![0, 1]));
        assert!(!conn.state().peer_choking);
        assert!(conn.is_free());

        // bitfield answered with interest
        let sent = drain(&mut rx);
        assert_eq!(sent, vec![PeerMessage::Interested.encode()]);
        assert!(conn.state().am_interested);
    }

    #[test]
    fn test_partial_block_waits_for_rest() {
        let (mut conn, _rx) = ready();
        let block = BlockInfo::new(1, 0, 4);
        conn.request_block(block, Instant::now());

        let bytes = PeerMessage::Piece {
            piece_index: 1,
            offset: 0,
            data: Bytes::from_static(b"abcd"),
        }
        .encode();

        assert!(conn.receive(&bytes[..2]).unwrap().is_empty());
        assert!(conn.receive(&bytes[2..10]).unwrap().is_empty());
        assert_eq!(conn.outstanding(), 1);

        let events = conn.receive(&bytes[10..]).unwrap();
        assert_eq!(
            events,
            vec![PeerEvent::Block {
                piece_index: 1,
                offset: 0,
                data: Bytes::from_static(b"abcd"),
            }]
        );
        assert_eq!(conn.outstanding(), 0);
    }

    #[test]
    fn test_choke_blocks_admission() {
        let (mut conn, _rx) = ready();
        assert!(conn.is_free());

        conn.receive(&PeerMessage::Choke.encode()).unwrap();
        assert!(!conn.is_free());

        conn.receive(&PeerMessage::Unchoke.encode()).unwrap();
        assert!(conn.is_free());
    }

    #[test]
    fn test_no_admission_without_bitfield() {
        let (mut conn, _rx) = active();
        conn.receive(&PeerMessage::Unchoke.encode()).unwrap();
        assert!(!conn.is_free());
    }

    #[test]
    fn test_request_cap() {
        let (mut conn, mut rx) = ready();
        let now = Instant::now();

        for i in 0..5 {
            assert!(conn.is_free());
            conn.request_block(BlockInfo::new(0, i * 16384, 16384), now);
        }
        assert!(!conn.is_free());
        assert_eq!(drain(&mut rx).len(), 5);

        conn.receive(
            &PeerMessage::Piece {
                piece_index: 0,
                offset: 16384,
                data: Bytes::from(vec![0u8; 16384]),
            }
            .encode(),
        )
        .unwrap();
        assert!(conn.is_free());
    }

    #[test]
    fn test_expire_requests() {
        let (mut conn, _rx) = ready();
        let start = Instant::now();
        let timeout = Duration::from_secs(5);

        conn.request_block(BlockInfo::new(0, 0, 16384), start);
        conn.request_block(BlockInfo::new(0, 16384, 16384), start + Duration::from_secs(3));

        assert!(conn.expire_requests(start + Duration::from_secs(4), timeout).is_empty());

        let expired = conn.expire_requests(start + Duration::from_secs(5), timeout);
        assert_eq!(expired, vec![BlockInfo::new(0, 0, 16384)]);
        assert_eq!(conn.outstanding(), 1);
    }

    #[test]
    fn test_oversized_frame_is_protocol_error() {
        let (mut conn, _rx) = active();
        let header = ((MAX_FRAME_LEN + 1) as u32).to_be_bytes();
        assert!(conn.receive(&header).is_err());
    }

    #[test]
    fn test_disconnect_returns_outstanding_once() {
        let (mut conn, mut rx) = ready();
        conn.request_block(BlockInfo::new(1, 0, 16384), Instant::now());

        assert_eq!(conn.disconnect(), vec![BlockInfo::new(1, 0, 16384)]);
        assert_eq!(conn.status(), ConnectionStatus::Disconnected);
        assert!(conn.disconnect().is_empty());
        assert!(!conn.is_free());

        // socket channel dropped, later input ignored
        drain(&mut rx);
        assert!(rx.try_recv().is_err());
        assert!(conn.receive(&PeerMessage::Unchoke.encode()).unwrap().is_empty());
    }

    #[test]
    fn test_block_before_bad_frame_is_still_delivered() {
        let (mut conn, _rx) = ready();
        conn.request_block(BlockInfo::new(0, 0, 4), Instant::now());

        let mut bytes = PeerMessage::Piece {
            piece_index: 0,
            offset: 0,
            data: Bytes::from_static(b"abcd"),
        }
        .encode()
        .to_vec();
        // have with a two byte payload
        bytes.extend_from_slice(&[0, 0, 0, 3, 4, 0, 0]);

        let err = conn.receive(&bytes).unwrap_err();
        assert!(matches!(err.error, LeechError::Peer(_)));
        assert_eq!(
            err.events,
            vec![PeerEvent::Block {
                piece_index: 0,
                offset: 0,
                data: Bytes::from_static(b"abcd"),
            }]
        );
        assert!(conn.disconnect().is_empty());
    }

    #[test]
    fn test_request_before_bad_frame_is_returned_on_disconnect() {
        let (mut conn, _rx) = ready();
        conn.request_block(BlockInfo::new(0, 0, 4), Instant::now());

        let header = ((MAX_FRAME_LEN + 1) as u32).to_be_bytes();
        let err = conn.receive(&header).unwrap_err();
        assert!(err.events.is_empty());
        assert_eq!(conn.disconnect(), vec![BlockInfo::new(0, 0, 4)]);
    }
}
