use crate::error::{LeechError, Result};
use std::fmt;

/// Expected SHA-1 digest of one piece
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PieceHash([u8; 20]);

impl PieceHash {
    pub fn new(hash: [u8; 20]) -> Self {
        Self(hash)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for PieceHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PieceHash({})", self.to_hex())
    }
}

/// Ordered piece hashes taken from the `pieces` field
#[derive(Debug, Clone, Default)]
pub struct Pieces {
    hashes: Vec<PieceHash>,
}

impl Pieces {
    /// Split the concatenated 20-byte digests
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() % 20 != 0 {
            return Err(LeechError::InvalidTorrent(format!(
                "pieces field is {} bytes, not a multiple of 20",
                data.len()
            )));
        }

        let hashes = data
            .chunks_exact(20)
            .map(|chunk| {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(chunk);
                PieceHash(hash)
            })
            .collect();

        Ok(Self { hashes })
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&PieceHash> {
        self.hashes.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PieceHash> {
        self.hashes.iter()
    }
}

impl From<Vec<PieceHash>> for Pieces {
    fn from(hashes: Vec<PieceHash>) -> Self {
        Self { hashes }
    }
}
