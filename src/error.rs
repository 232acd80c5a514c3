use thiserror::Error;

#[derive(Error, Debug)]
pub enum LeechError {
    #[error("Bencode parsing error at byte {offset}: {reason}")]
    Bencode { offset: usize, reason: String },

    #[error("Invalid torrent file: {0}")]
    InvalidTorrent(String),

    #[error("Tracker error: {0}")]
    Tracker(String),

    #[error("Peer connection error: {0}")]
    Peer(String),

    #[error("Handshake info hash mismatch: expected {expected}, got {received}")]
    HandshakeMismatch { expected: String, received: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl LeechError {
    pub fn bencode(offset: usize, reason: impl Into<String>) -> Self {
        LeechError::Bencode {
            offset,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, LeechError>;
