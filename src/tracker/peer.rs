use std::net::{Ipv4Addr, SocketAddr};

/// Size of one compact peer entry: 4 bytes IPv4 + 2 bytes port
pub const COMPACT_PEER_LEN: usize = 6;

/// Parse a compact peer list. A trailing partial entry is ignored.
pub fn parse_compact_peers(data: &[u8]) -> Vec<SocketAddr> {
    data.chunks_exact(COMPACT_PEER_LEN)
        .map(|chunk| {
            let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
            let port = u16::from_be_bytes([chunk[4], chunk[5]]);
            SocketAddr::from((ip, port))
        })
        .filter(|addr| addr.port() != 0)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_compact_peers() {
        let data = [127, 0, 0, 1, 0x1A, 0xE1, 10, 0, 0, 2, 0x00, 0x50, 1, 2];

        assert_eq!(
            parse_compact_peers(&data),
            vec![
                "127.0.0.1:6881".parse::<SocketAddr>().unwrap(),
                "10.0.0.2:80".parse::<SocketAddr>().unwrap(),
            ]
        );
    }

    #[test]
    fn test_zero_port_skipped() {
        assert!(parse_compact_peers(&[1, 2, 3, 4, 0, 0]).is_empty());
    }
}
