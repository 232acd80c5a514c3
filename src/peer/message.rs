use crate::error::{LeechError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Identity of a block on the wire: which piece, where in it, how long
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockInfo {
    pub piece_index: u32,
    pub offset: u32,
    pub length: u32,
}

impl BlockInfo {
    pub fn new(piece_index: u32, offset: u32, length: u32) -> Self {
        Self {
            piece_index,
            offset,
            length,
        }
    }
}

/// Messages exchanged after the handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerMessage {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have { piece_index: u32 },
    /// Raw bit-packed availability, see [`super::bitfield`]
    Bitfield { bitfield: Bytes },
    Request { block: BlockInfo },
    Piece {
        piece_index: u32,
        offset: u32,
        data: Bytes,
    },
    /// Any id this client does not speak (cancel, port, extensions)
    Unknown { id: u8 },
}

impl PeerMessage {
    const CHOKE: u8 = 0;
    const UNCHOKE: u8 = 1;
    const INTERESTED: u8 = 2;
    const NOT_INTERESTED: u8 = 3;
    const HAVE: u8 = 4;
    const BITFIELD: u8 = 5;
    const REQUEST: u8 = 6;
    const PIECE: u8 = 7;

    /// Serialize with the 4-byte length prefix.
    /// Format: <length prefix><message ID><payload>
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();

        match self {
            PeerMessage::KeepAlive => buf.put_u32(0),
            PeerMessage::Choke => put_header(&mut buf, Self::CHOKE, 0),
            PeerMessage::Unchoke => put_header(&mut buf, Self::UNCHOKE, 0),
            PeerMessage::Interested => put_header(&mut buf, Self::INTERESTED, 0),
            PeerMessage::NotInterested => put_header(&mut buf, Self::NOT_INTERESTED, 0),
            PeerMessage::Have { piece_index } => {
                put_header(&mut buf, Self::HAVE, 4);
                buf.put_u32(*piece_index);
            }
            PeerMessage::Bitfield { bitfield } => {
                put_header(&mut buf, Self::BITFIELD, bitfield.len());
                buf.put_slice(bitfield);
            }
            PeerMessage::Request { block } => {
                put_header(&mut buf, Self::REQUEST, 12);
                buf.put_u32(block.piece_index);
                buf.put_u32(block.offset);
                buf.put_u32(block.length);
            }
            PeerMessage::Piece {
                piece_index,
                offset,
                data,
            } => {
                put_header(&mut buf, Self::PIECE, 8 + data.len());
                buf.put_u32(*piece_index);
                buf.put_u32(*offset);
                buf.put_slice(data);
            }
            PeerMessage::Unknown { id } => put_header(&mut buf, *id, 0),
        }

        buf.freeze()
    }

    /// Decode one complete frame body: the message id followed by its
    /// payload, with the length prefix already stripped by the framer.
    pub fn decode(mut frame: Bytes) -> Result<Self> {
        if frame.is_empty() {
            return Ok(PeerMessage::KeepAlive);
        }

        let id = frame.get_u8();
        let payload_len = frame.len();

        let expect_len = |len: usize| -> Result<()> {
            if payload_len == len {
                Ok(())
            } else {
                Err(LeechError::Peer(format!(
                    "message id {} has {} payload bytes, expected {}",
                    id, payload_len, len
                )))
            }
        };

        let message = match id {
            Self::CHOKE => {
                expect_len(0)?;
                PeerMessage::Choke
            }
            Self::UNCHOKE => {
                expect_len(0)?;
                PeerMessage::Unchoke
            }
            Self::INTERESTED => {
                expect_len(0)?;
                PeerMessage::Interested
            }
            Self::NOT_INTERESTED => {
                expect_len(0)?;
                PeerMessage::NotInterested
            }
            Self::HAVE => {
                expect_len(4)?;
                PeerMessage::Have {
                    piece_index: frame.get_u32(),
                }
            }
            Self::BITFIELD => PeerMessage::Bitfield { bitfield: frame },
            Self::REQUEST => {
                expect_len(12)?;
                PeerMessage::Request {
                    block: BlockInfo::new(frame.get_u32(), frame.get_u32(), frame.get_u32()),
                }
            }
            Self::PIECE => {
                if payload_len < 8 {
                    return Err(LeechError::Peer(format!(
                        "piece message too short: {} bytes",
                        payload_len
                    )));
                }
                let piece_index = frame.get_u32();
                let offset = frame.get_u32();
                PeerMessage::Piece {
                    piece_index,
                    offset,
                    data: frame,
                }
            }
            id => PeerMessage::Unknown { id },
        };

        Ok(message)
    }
}

fn put_header(buf: &mut BytesMut, id: u8, payload_len: usize) {
    buf.put_u32((1 + payload_len) as u32);
    buf.put_u8(id);
}
