mod store;

pub use store::{BlockOutcome, PieceStore};

use crate::peer::BlockInfo;
use crate::torrent::PieceHash;

/// Standard block size (16 KiB)
pub const BLOCK_SIZE: u32 = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    Needed,
    Requested,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PieceStatus {
    Needed,
    Complete,
}

/// One transfer unit inside a piece. Its extent never changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub piece_index: u32,
    pub offset: u32,
    pub length: u32,
    pub status: BlockStatus,
    /// Set once the block has been requested. A needed block that was
    /// never requested has no data in flight and cannot be completed.
    pub solicited: bool,
}

impl Block {
    pub fn info(&self) -> BlockInfo {
        BlockInfo::new(self.piece_index, self.offset, self.length)
    }
}

/// A hash-verified range of the content and the blocks covering it
#[derive(Debug)]
pub struct Piece {
    pub index: u32,
    pub length: u32,
    pub hash: PieceHash,
    pub status: PieceStatus,
    pub blocks: Vec<Block>,
    /// Blocks in `Complete` state
    pub completed: usize,
    /// Assembly buffer; released once the piece is written out
    buffer: Vec<u8>,
}

impl Piece {
    pub fn new(index: u32, length: u32, hash: PieceHash) -> Self {
        let blocks = (0..length)
            .step_by(BLOCK_SIZE as usize)
            .map(|offset| Block {
                piece_index: index,
                offset,
                length: BLOCK_SIZE.min(length - offset),
                status: BlockStatus::Needed,
                solicited: false,
            })
            .collect();

        Self {
            index,
            length,
            hash,
            status: PieceStatus::Needed,
            blocks,
            completed: 0,
            buffer: vec![0u8; length as usize],
        }
    }

    fn block_mut(&mut self, offset: u32) -> Option<&mut Block> {
        self.blocks.iter_mut().find(|b| b.offset == offset)
    }

    /// Throw away assembled data and make every block requestable again
    fn reset(&mut self) {
        for block in &mut self.blocks {
            block.status = BlockStatus::Needed;
            block.solicited = false;
        }
        self.completed = 0;
        self.status = PieceStatus::Needed;
        self.buffer = vec![0u8; self.length as usize];
    }
}
