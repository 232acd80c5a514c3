use super::Pieces;
use crate::bencode::{encode, Bencode};
use crate::error::{LeechError, Result};
use sha1::{Digest, Sha1};
use std::path::{Path, PathBuf};

/// One destination file, in declaration order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub path: Vec<String>,
    pub length: u64,
}

/// The `info` dictionary: everything needed to download and lay out content
#[derive(Debug, Clone)]
pub struct TorrentInfo {
    pub name: String,
    pub piece_length: u64,
    pub pieces: Pieces,
    pub files: Vec<FileInfo>,
    pub total_length: u64,
}

impl TorrentInfo {
    /// Build and validate an info section. The piece count must cover
    /// `total_length` exactly.
    pub fn new(name: String, piece_length: u64, pieces: Pieces, files: Vec<FileInfo>) -> Result<Self> {
        if piece_length == 0 || piece_length > u32::MAX as u64 {
            return Err(LeechError::InvalidTorrent(format!(
                "unsupported piece length {}",
                piece_length
            )));
        }

        let total_length = files.iter().map(|f| f.length).sum::<u64>();
        let expected = total_length.div_ceil(piece_length) as usize;
        if pieces.len() != expected {
            return Err(LeechError::InvalidTorrent(format!(
                "{} piece hashes for {} bytes at piece length {} (expected {})",
                pieces.len(),
                total_length,
                piece_length,
                expected
            )));
        }

        Ok(Self {
            name,
            piece_length,
            pieces,
            files,
            total_length,
        })
    }

    fn from_bencode(value: &Bencode) -> Result<Self> {
        let name = value
            .get("name")
            .and_then(Bencode::as_str)
            .ok_or_else(|| missing("name"))?
            .to_string();

        let piece_length = value
            .get("piece length")
            .and_then(Bencode::as_u64)
            .ok_or_else(|| missing("piece length"))?;

        let pieces = value
            .get("pieces")
            .and_then(Bencode::as_bytes)
            .ok_or_else(|| missing("pieces"))
            .and_then(Pieces::from_bytes)?;

        let files = match (value.get("length"), value.get("files")) {
            (Some(length), _) => {
                let length = length.as_u64().ok_or_else(|| missing("length"))?;
                vec![FileInfo {
                    path: vec![name.clone()],
                    length,
                }]
            }
            (None, Some(files)) => files
                .as_list()
                .ok_or_else(|| missing("files"))?
                .iter()
                .map(parse_file)
                .collect::<Result<Vec<_>>>()?,
            (None, None) => return Err(missing("length or files")),
        };

        Self::new(name, piece_length, pieces, files)
    }

    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }

    /// Length of piece `index`; the last one takes the remainder
    pub fn piece_len(&self, index: usize) -> u64 {
        if index + 1 < self.piece_count() {
            return self.piece_length;
        }
        match self.total_length % self.piece_length {
            0 => self.piece_length,
            remainder => remainder,
        }
    }

    /// Directory file paths are relative to. A single-file torrent is laid
    /// out directly in `download_dir`, a multi-file one in a folder named
    /// after the torrent.
    pub fn content_root(&self, download_dir: &Path) -> PathBuf {
        let single_file = self.files.len() == 1 && self.files[0].path == [self.name.as_str()];
        if single_file {
            download_dir.to_path_buf()
        } else {
            download_dir.join(&self.name)
        }
    }
}

fn parse_file(value: &Bencode) -> Result<FileInfo> {
    let length = value
        .get("length")
        .and_then(Bencode::as_u64)
        .ok_or_else(|| missing("file length"))?;

    let path = value
        .get("path")
        .and_then(Bencode::as_list)
        .ok_or_else(|| missing("file path"))?
        .iter()
        .map(|segment| {
            segment
                .as_str()
                .map(String::from)
                .ok_or_else(|| LeechError::InvalidTorrent("path segment is not UTF-8".to_string()))
        })
        .collect::<Result<Vec<_>>>()?;

    if path.is_empty() {
        return Err(LeechError::InvalidTorrent("empty file path".to_string()));
    }
    // Paths are joined under the download root and must stay there
    if path
        .iter()
        .any(|s| s.is_empty() || s == "." || s == ".." || s.contains(['/', '\\']))
    {
        return Err(LeechError::InvalidTorrent(format!("unsafe file path {:?}", path)));
    }

    Ok(FileInfo { path, length })
}

fn missing(field: &str) -> LeechError {
    LeechError::InvalidTorrent(format!("missing or invalid '{}'", field))
}

/// A parsed .torrent file
#[derive(Debug, Clone)]
pub struct Metainfo {
    pub announce: Option<String>,
    pub announce_list: Vec<Vec<String>>,
    pub info: TorrentInfo,
    pub info_hash: [u8; 20],
}

impl Metainfo {
    pub fn from_bencode(value: &Bencode) -> Result<Self> {
        let announce = value.get("announce").and_then(Bencode::as_str).map(String::from);

        let announce_list = value
            .get("announce-list")
            .and_then(Bencode::as_list)
            .map(|tiers| {
                tiers
                    .iter()
                    .filter_map(Bencode::as_list)
                    .map(|urls| urls.iter().filter_map(|u| u.as_str().map(String::from)).collect())
                    .collect()
            })
            .unwrap_or_default();

        let info_value = value.get("info").ok_or_else(|| missing("info"))?;
        let info = TorrentInfo::from_bencode(info_value)?;

        // Dictionaries re-encode canonically, so this is the hash of the
        // original info bytes for any well-formed torrent.
        let info_hash: [u8; 20] = Sha1::digest(encode(info_value)).into();

        Ok(Self {
            announce,
            announce_list,
            info,
            info_hash,
        })
    }

    pub fn info_hash_hex(&self) -> String {
        hex::encode(self.info_hash)
    }

    /// Every tracker URL, `announce` first, without duplicates
    pub fn trackers(&self) -> Vec<String> {
        let mut trackers: Vec<String> = Vec::new();
        let all = self.announce.iter().chain(self.announce_list.iter().flatten());

        for url in all {
            if !trackers.contains(url) {
                trackers.push(url.clone());
            }
        }

        trackers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::decode;

    fn multi_file_torrent() -> Vec<u8> {
        let mut raw = Vec::new();
        raw.extend_from_slice(b"d8:announce19:udp://tracker:80/an");
        raw.extend_from_slice(b"13:announce-listll19:udp://tracker:80/anel15:http://other/ane");
        raw.extend_from_slice(b"e4:infod5:filesld6:lengthi4e4:pathl1:aeed6:lengthi12e4:pathl3:sub1:beee");
        raw.extend_from_slice(b"4:name3:dir12:piece lengthi10e6:pieces40:");
        raw.extend_from_slice(&[7u8; 40]);
        raw.extend_from_slice(b"ee");
        raw
    }

    #[test]
    fn test_parse_multi_file() {
        let raw = multi_file_torrent();
        let metainfo = Metainfo::from_bencode(&decode(&raw).unwrap()).unwrap();

        assert_eq!(metainfo.info.name, "dir");
        assert_eq!(metainfo.info.total_length, 16);
        assert_eq!(metainfo.info.piece_count(), 2);
        assert_eq!(metainfo.info.files[1].path, vec!["sub", "b"]);
        assert_eq!(
            metainfo.trackers(),
            vec!["udp://tracker:80/an".to_string(), "http://other/an".to_string()]
        );
    }

    #[test]
    fn test_info_hash_covers_raw_info_bytes() {
        let raw = multi_file_torrent();
        let metainfo = Metainfo::from_bencode(&decode(&raw).unwrap()).unwrap();

        let start = raw.windows(6).position(|w| w == b"4:info").unwrap() + 6;
        let info_bytes = &raw[start..raw.len() - 1];
        let expected: [u8; 20] = Sha1::digest(info_bytes).into();
        assert_eq!(metainfo.info_hash, expected);
    }

    #[test]
    fn test_piece_count_must_match_length() {
        let pieces = Pieces::from_bytes(&[0u8; 20]).unwrap();
        let files = vec![FileInfo {
            path: vec!["a".to_string()],
            length: 30,
        }];
        assert!(TorrentInfo::new("a".to_string(), 10, pieces, files).is_err());
    }

    #[test]
    fn test_last_piece_length() {
        let pieces = Pieces::from_bytes(&[0u8; 60]).unwrap();
        let files = vec![FileInfo {
            path: vec!["a".to_string()],
            length: 25,
        }];
        let info = TorrentInfo::new("a".to_string(), 10, pieces, files).unwrap();

        assert_eq!(info.piece_len(0), 10);
        assert_eq!(info.piece_len(2), 5);
        assert_eq!(info.content_root(Path::new("/dl")), PathBuf::from("/dl"));
    }

    #[test]
    fn test_rejects_path_traversal() {
        let raw = b"d6:lengthi1e4:pathl2:..6:passwdee";
        assert!(parse_file(&decode(raw).unwrap()).is_err());
    }
}
