use super::{BlockStatus, Piece, PieceStatus};
use crate::error::Result;
use crate::peer::bitfield::encode_bitfield;
use crate::peer::BlockInfo;
use crate::storage::Storage;
use crate::torrent::TorrentInfo;
use sha1::{Digest, Sha1};
use tracing::{debug, info, warn};

/// What storing a block led to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    /// Unknown, unsolicited or already complete block, or wrong length
    Ignored,
    /// Stored; the piece still has missing blocks
    Stored,
    /// Last block stored, hash matched, piece written to disk
    Verified,
    /// Last block stored but the hash did not match; piece reset
    Rejected,
}

/// Authoritative piece and block state, assembly buffers, and the path
/// from a verified piece to the destination files
pub struct PieceStore {
    pieces: Vec<Piece>,
    storage: Storage,
    completed: usize,
}

impl PieceStore {
    pub fn new(info: &TorrentInfo, storage: Storage) -> Self {
        let pieces = info
            .pieces
            .iter()
            .enumerate()
            .map(|(index, hash)| Piece::new(index as u32, info.piece_len(index) as u32, *hash))
            .collect();

        Self {
            pieces,
            storage,
            completed: 0,
        }
    }

    fn piece_mut(&mut self, index: u32) -> Option<&mut Piece> {
        self.pieces.get_mut(index as usize)
    }

    pub fn piece(&self, index: u32) -> Option<&Piece> {
        self.pieces.get(index as usize)
    }

    /// First block of `piece_index` still waiting to be requested
    pub fn block_needed(&self, piece_index: u32) -> Option<BlockInfo> {
        self.piece(piece_index)?
            .blocks
            .iter()
            .find(|b| b.status == BlockStatus::Needed)
            .map(|b| b.info())
    }

    /// First of `candidates`, in the order given, whose piece is not yet
    /// complete. Indices past the piece count are skipped.
    pub fn piece_needed(&self, candidates: &[u32]) -> Option<u32> {
        candidates
            .iter()
            .copied()
            .find(|&i| matches!(self.piece(i), Some(p) if p.status == PieceStatus::Needed))
    }

    /// Needed -> Requested. Unknown pieces or blocks are ignored.
    pub fn mark_requested(&mut self, piece_index: u32, block: BlockInfo) {
        let Some(piece) = self.piece_mut(piece_index) else {
            return;
        };

        if let Some(found) = piece
            .blocks
            .iter_mut()
            .find(|b| b.offset == block.offset && b.length == block.length)
        {
            if found.status == BlockStatus::Needed {
                found.status = BlockStatus::Requested;
                found.solicited = true;
            }
        }
    }

    /// Requested -> Needed, for requests that timed out or died with their
    /// connection
    pub fn mark_needed(&mut self, block: BlockInfo) {
        let Some(piece) = self.piece_mut(block.piece_index) else {
            return;
        };

        if let Some(found) = piece.block_mut(block.offset) {
            if found.status == BlockStatus::Requested {
                found.status = BlockStatus::Needed;
                debug!(
                    "Block piece {} offset {} is needed again",
                    block.piece_index, block.offset
                );
            }
        }
    }

    /// Copy block data into its piece and verify the piece once every
    /// block is in
    pub async fn mark_downloaded(
        &mut self,
        piece_index: u32,
        offset: u32,
        data: &[u8],
    ) -> Result<BlockOutcome> {
        let Some(piece) = self.piece_mut(piece_index) else {
            warn!("Block for unknown piece {}", piece_index);
            return Ok(BlockOutcome::Ignored);
        };
        if piece.status == PieceStatus::Complete {
            return Ok(BlockOutcome::Ignored);
        }

        let Some(block) = piece.block_mut(offset) else {
            warn!("Block at unaligned offset {} in piece {}", offset, piece_index);
            return Ok(BlockOutcome::Ignored);
        };
        if block.status == BlockStatus::Complete {
            debug!("Duplicate block piece {} offset {}", piece_index, offset);
            return Ok(BlockOutcome::Ignored);
        }
        // Needed but solicited is a late answer to a timed-out request
        if !block.solicited {
            warn!("Unsolicited block piece {} offset {}", piece_index, offset);
            return Ok(BlockOutcome::Ignored);
        }
        if block.length as usize != data.len() {
            warn!(
                "Block piece {} offset {} is {} bytes, expected {}",
                piece_index,
                offset,
                data.len(),
                block.length
            );
            return Ok(BlockOutcome::Ignored);
        }

        block.status = BlockStatus::Complete;
        let start = offset as usize;
        piece.buffer[start..start + data.len()].copy_from_slice(data);
        piece.completed += 1;

        debug!(
            "Piece {}: {}/{} blocks",
            piece_index,
            piece.completed,
            piece.blocks.len()
        );

        if piece.completed < piece.blocks.len() {
            return Ok(BlockOutcome::Stored);
        }

        if self.verify(piece_index).await? {
            Ok(BlockOutcome::Verified)
        } else {
            Ok(BlockOutcome::Rejected)
        }
    }

    /// Hash the piece buffer against the expected digest. On a match the
    /// piece is written out and marked complete; otherwise all of its
    /// blocks go back to needed with a zeroed buffer.
    pub async fn verify(&mut self, piece_index: u32) -> Result<bool> {
        let Some(piece) = self.pieces.get_mut(piece_index as usize) else {
            return Ok(false);
        };
        if piece.status == PieceStatus::Complete {
            return Ok(true);
        }

        let digest: [u8; 20] = Sha1::digest(&piece.buffer).into();
        if &digest != piece.hash.as_bytes() {
            warn!(
                "Piece {} failed verification (expected {}, got {})",
                piece_index,
                piece.hash.to_hex(),
                hex::encode(digest)
            );
            piece.reset();
            return Ok(false);
        }

        self.storage.write_piece(piece_index, &piece.buffer).await?;

        piece.status = PieceStatus::Complete;
        piece.buffer = Vec::new();
        self.completed += 1;

        info!(
            "Piece {} verified ({}/{}, {:.1}%)",
            piece_index,
            self.completed,
            self.pieces.len(),
            self.progress()
        );

        Ok(true)
    }

    /// Our own availability, for the bitfield sent after a handshake
    pub fn bitfield(&self) -> Vec<u8> {
        let complete = self
            .pieces
            .iter()
            .filter(|p| p.status == PieceStatus::Complete)
            .map(|p| p.index);
        encode_bitfield(complete, self.pieces.len())
    }

    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }

    pub fn complete_count(&self) -> usize {
        self.completed
    }

    pub fn is_complete(&self) -> bool {
        self.completed == self.pieces.len()
    }

    pub fn progress(&self) -> f64 {
        if self.pieces.is_empty() {
            return 100.0;
        }
        (self.completed as f64 / self.pieces.len() as f64) * 100.0
    }
}
