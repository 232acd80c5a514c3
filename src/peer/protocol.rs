use crate::error::{LeechError, Result};

pub const PROTOCOL_STRING: &[u8] = b"BitTorrent protocol";

/// Handshake length: 1 + 19 + 8 + 20 + 20
pub const HANDSHAKE_LEN: usize = 68;

/// Opening message of every connection.
/// Format: <pstrlen><pstr><reserved><info_hash><peer_id>, no length prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
}

impl Handshake {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Self { info_hash, peer_id }
    }

    pub fn encode(&self) -> [u8; HANDSHAKE_LEN] {
        let mut buf = [0u8; HANDSHAKE_LEN];
        buf[0] = PROTOCOL_STRING.len() as u8;
        buf[1..20].copy_from_slice(PROTOCOL_STRING);
        // 20..28 reserved, left zero: no extensions advertised
        buf[28..48].copy_from_slice(&self.info_hash);
        buf[48..68].copy_from_slice(&self.peer_id);
        buf
    }

    /// Decode exactly [`HANDSHAKE_LEN`] bytes
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() != HANDSHAKE_LEN {
            return Err(LeechError::Peer(format!(
                "handshake must be {} bytes, got {}",
                HANDSHAKE_LEN,
                data.len()
            )));
        }

        if data[0] as usize != PROTOCOL_STRING.len() || &data[1..20] != PROTOCOL_STRING {
            return Err(LeechError::Peer("unknown protocol in handshake".to_string()));
        }

        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&data[28..48]);

        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&data[48..68]);

        Ok(Handshake { info_hash, peer_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_layout() {
        let handshake = Handshake::new([1u8; 20], [2u8; 20]);
        let bytes = handshake.encode();

        assert_eq!(bytes[0], 19);
        assert_eq!(&bytes[1..20], PROTOCOL_STRING);
        assert_eq!(&bytes[20..28], &[0u8; 8]);
        assert_eq!(&bytes[28..48], &[1u8; 20]);

        assert_eq!(Handshake::decode(&bytes).unwrap(), handshake);
    }

    #[test]
    fn test_rejects_other_protocols() {
        let mut bytes = Handshake::new([1u8; 20], [2u8; 20]).encode();
        bytes[5] = b'x';
        assert!(Handshake::decode(&bytes).is_err());
        assert!(Handshake::decode(&bytes[..67]).is_err());
    }
}
