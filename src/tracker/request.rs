/// Events sent to the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerEvent {
    Started,
    Stopped,
    Completed,
}

impl TrackerEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackerEvent::Started => "started",
            TrackerEvent::Stopped => "stopped",
            TrackerEvent::Completed => "completed",
        }
    }

    /// Event code in the UDP announce packet (0 means none)
    pub fn udp_code(event: Option<TrackerEvent>) -> u32 {
        match event {
            None => 0,
            Some(TrackerEvent::Completed) => 1,
            Some(TrackerEvent::Started) => 2,
            Some(TrackerEvent::Stopped) => 3,
        }
    }
}

/// Announce parameters shared by the HTTP and UDP transports
#[derive(Debug, Clone)]
pub struct TrackerRequest {
    /// SHA1 hash of the info dictionary
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
    /// Port advertised to the swarm
    pub port: u16,
    pub uploaded: u64,
    pub downloaded: u64,
    /// Number of bytes left to download
    pub left: u64,
    pub event: Option<TrackerEvent>,
    pub compact: bool,
}

impl TrackerRequest {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20], port: u16, left: u64) -> Self {
        Self {
            info_hash,
            peer_id,
            port,
            uploaded: 0,
            downloaded: 0,
            left,
            event: Some(TrackerEvent::Started),
            compact: true,
        }
    }

    /// HTTP query string. The binary fields are percent-encoded byte by
    /// byte and must not be encoded a second time.
    pub fn query_string(&self) -> String {
        let mut query = format!(
            "info_hash={}&peer_id={}&port={}&uploaded={}&downloaded={}&left={}&compact={}",
            percent_encode(&self.info_hash),
            percent_encode(&self.peer_id),
            self.port,
            self.uploaded,
            self.downloaded,
            self.left,
            if self.compact { 1 } else { 0 }
        );

        if let Some(event) = self.event {
            query.push_str("&event=");
            query.push_str(event.as_str());
        }

        query
    }
}

/// Percent-encode raw bytes, leaving RFC 3986 unreserved characters as is
fn percent_encode(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| {
            if b.is_ascii_alphanumeric() || b"-._~".contains(&b) {
                (b as char).to_string()
            } else {
                format!("%{:02X}", b)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_string() {
        let mut info_hash = [0u8; 20];
        info_hash[0] = 0xAB;
        info_hash[1] = b'a';
        let request = TrackerRequest::new(info_hash, *b"-LE0001-abcdefghijkl", 6881, 1000);

        let query = request.query_string();

        assert!(query.starts_with("info_hash=%ABa%00%00"));
        assert!(query.contains("&peer_id=-LE0001-abcdefghijkl&"));
        assert!(query.contains("&left=1000&"));
        assert!(query.ends_with("&compact=1&event=started"));
    }

    #[test]
    fn test_udp_event_codes() {
        assert_eq!(TrackerEvent::udp_code(None), 0);
        assert_eq!(TrackerEvent::udp_code(Some(TrackerEvent::Completed)), 1);
        assert_eq!(TrackerEvent::udp_code(Some(TrackerEvent::Started)), 2);
        assert_eq!(TrackerEvent::udp_code(Some(TrackerEvent::Stopped)), 3);
    }
}
