use crate::error::{LeechError, Result};
use crate::torrent::TorrentInfo;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info};

/// Destination files laid end to end in declaration order
pub struct Storage {
    files: Vec<FileEntry>,
    piece_length: u64,
}

struct FileEntry {
    path: PathBuf,
    length: u64,
    /// Global offset of the file's first byte
    start: u64,
}

/// The part of one piece that lands in one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSegment {
    pub file_index: usize,
    /// Offset into the piece buffer
    pub piece_offset: usize,
    /// Offset into the file
    pub file_offset: u64,
    pub length: usize,
}

impl Storage {
    /// Compute the layout without touching the filesystem
    pub fn layout(root: &Path, info: &TorrentInfo) -> Self {
        let mut start = 0u64;
        let files = info
            .files
            .iter()
            .map(|file| {
                let entry = FileEntry {
                    path: file.path.iter().fold(root.to_path_buf(), |p, s| p.join(s)),
                    length: file.length,
                    start,
                };
                start += file.length;
                entry
            })
            .collect();

        Self {
            files,
            piece_length: info.piece_length,
        }
    }

    /// Lay out the files under `root`, creating every directory and an
    /// empty file for each entry
    pub async fn create(root: &Path, info: &TorrentInfo) -> Result<Self> {
        let storage = Self::layout(root, info);

        fs::create_dir_all(root).await?;
        for file in &storage.files {
            if let Some(parent) = file.path.parent() {
                fs::create_dir_all(parent).await?;
            }
            OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(false)
                .open(&file.path)
                .await?;
        }

        info!(
            "Storage initialized under {}: {} files, {} bytes total",
            root.display(),
            storage.files.len(),
            info.total_length
        );

        Ok(storage)
    }

    /// Where a piece of `piece_len` bytes lands. Files are scanned in order
    /// and the scan stops at the first file starting past the piece.
    pub fn segments(&self, piece_index: u32, piece_len: u64) -> Vec<FileSegment> {
        let piece_start = piece_index as u64 * self.piece_length;
        let piece_end = piece_start + piece_len;
        let mut segments = Vec::new();

        for (file_index, file) in self.files.iter().enumerate() {
            if file.start >= piece_end {
                break;
            }

            let file_end = file.start + file.length;
            let overlap_start = piece_start.max(file.start);
            let overlap_end = piece_end.min(file_end);
            if overlap_start >= overlap_end {
                continue;
            }

            segments.push(FileSegment {
                file_index,
                piece_offset: (overlap_start - piece_start) as usize,
                file_offset: overlap_start - file.start,
                length: (overlap_end - overlap_start) as usize,
            });
        }

        segments
    }

    /// Write a verified piece into every file it overlaps
    pub async fn write_piece(&self, piece_index: u32, data: &[u8]) -> Result<()> {
        for segment in self.segments(piece_index, data.len() as u64) {
            let file = &self.files[segment.file_index];
            let bytes = &data[segment.piece_offset..segment.piece_offset + segment.length];

            let mut handle = OpenOptions::new()
                .write(true)
                .open(&file.path)
                .await
                .map_err(|e| {
                    LeechError::Storage(format!("cannot open {}: {}", file.path.display(), e))
                })?;

            handle.seek(SeekFrom::Start(segment.file_offset)).await?;
            handle.write_all(bytes).await?;
            handle.flush().await?;

            debug!(
                "Wrote {} bytes of piece {} to {} at offset {}",
                segment.length,
                piece_index,
                file.path.display(),
                segment.file_offset
            );
        }

        Ok(())
    }
}
