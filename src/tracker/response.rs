use super::peer::parse_compact_peers;
use crate::bencode::Bencode;
use crate::error::{LeechError, Result};
use std::net::{IpAddr, SocketAddr};

/// Response from a tracker, transport independent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerResponse {
    /// Interval in seconds to wait before next request
    pub interval: u64,
    /// Number of seeders, when reported
    pub complete: Option<u64>,
    /// Number of leechers, when reported
    pub incomplete: Option<u64>,
    pub peers: Vec<SocketAddr>,
}

impl TrackerResponse {
    /// Parse an HTTP tracker's bencoded body
    pub fn from_bencode(value: &Bencode) -> Result<Self> {
        if value.as_dict().is_none() {
            return Err(LeechError::Tracker("response must be a dict".to_string()));
        }

        if let Some(failure) = value.get("failure reason") {
            let reason = failure.as_str().unwrap_or("unknown failure");
            return Err(LeechError::Tracker(reason.to_string()));
        }

        let interval = value
            .get("interval")
            .and_then(Bencode::as_u64)
            .ok_or_else(|| LeechError::Tracker("missing 'interval' field".to_string()))?;

        let peers = match value.get("peers") {
            Some(Bencode::Bytes(compact)) => parse_compact_peers(compact),
            Some(Bencode::List(list)) => parse_peer_list(list)?,
            Some(_) => return Err(LeechError::Tracker("invalid 'peers' format".to_string())),
            None => return Err(LeechError::Tracker("missing 'peers' field".to_string())),
        };

        Ok(Self {
            interval,
            complete: value.get("complete").and_then(Bencode::as_u64),
            incomplete: value.get("incomplete").and_then(Bencode::as_u64),
            peers,
        })
    }

    /// Parse a UDP announce response: action, transaction id, interval,
    /// leechers, seeders, then compact peers
    pub fn from_udp(packet: &[u8]) -> Result<Self> {
        if packet.len() < 20 {
            return Err(LeechError::Tracker(format!(
                "announce response too short: {} bytes",
                packet.len()
            )));
        }

        let field = |at: usize| u32::from_be_bytes([packet[at], packet[at + 1], packet[at + 2], packet[at + 3]]);

        Ok(Self {
            interval: field(8) as u64,
            incomplete: Some(field(12) as u64),
            complete: Some(field(16) as u64),
            peers: parse_compact_peers(&packet[20..]),
        })
    }
}

/// Dictionary model: a list of `{ip, port, peer id}` dicts
fn parse_peer_list(list: &[Bencode]) -> Result<Vec<SocketAddr>> {
    list.iter()
        .map(|peer| {
            let ip: IpAddr = peer
                .get("ip")
                .and_then(Bencode::as_str)
                .ok_or_else(|| LeechError::Tracker("missing peer 'ip'".to_string()))?
                .parse()
                .map_err(|_| LeechError::Tracker("invalid peer IP address".to_string()))?;

            let port = peer
                .get("port")
                .and_then(Bencode::as_u64)
                .and_then(|p| u16::try_from(p).ok())
                .ok_or_else(|| LeechError::Tracker("missing or invalid peer 'port'".to_string()))?;

            Ok(SocketAddr::new(ip, port))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::decode;

    #[test]
    fn test_compact_response() {
        let body = b"d8:completei3e10:incompletei1e8:intervali1800e5:peers6:\x7f\x00\x00\x01\x1a\xe1e";
        let response = TrackerResponse::from_bencode(&decode(body).unwrap()).unwrap();

        assert_eq!(response.interval, 1800);
        assert_eq!(response.complete, Some(3));
        assert_eq!(response.incomplete, Some(1));
        assert_eq!(response.peers, vec!["127.0.0.1:6881".parse::<SocketAddr>().unwrap()]);
    }

    #[test]
    fn test_dictionary_peers() {
        let body = b"d8:intervali60e5:peersld2:ip8:10.0.0.17:peer id20:aaaaaaaaaaaaaaaaaaaa4:porti51413eeee";
        let response = TrackerResponse::from_bencode(&decode(body).unwrap()).unwrap();

        assert_eq!(response.peers, vec!["10.0.0.1:51413".parse::<SocketAddr>().unwrap()]);
    }

    #[test]
    fn test_failure_reason() {
        let body = b"d14:failure reason12:unregisterede";
        let err = TrackerResponse::from_bencode(&decode(body).unwrap()).unwrap_err();

        assert!(err.to_string().contains("unregistered"));
    }

    #[test]
    fn test_udp_response() {
        let mut packet = vec![0, 0, 0, 1, 0, 0, 0, 9];
        packet.extend_from_slice(&900u32.to_be_bytes());
        packet.extend_from_slice(&4u32.to_be_bytes());
        packet.extend_from_slice(&7u32.to_be_bytes());
        packet.extend_from_slice(&[192, 168, 1, 2, 0x1A, 0xE2]);

        let response = TrackerResponse::from_udp(&packet).unwrap();

        assert_eq!(response.interval, 900);
        assert_eq!(response.incomplete, Some(4));
        assert_eq!(response.complete, Some(7));
        assert_eq!(response.peers, vec!["192.168.1.2:6882".parse::<SocketAddr>().unwrap()]);
        assert!(TrackerResponse::from_udp(&packet[..12]).is_err());
    }
}
