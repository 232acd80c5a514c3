//! UDP tracker protocol (BEP 15): a connect exchange that yields a
//! connection id, then an announce carrying it.

use super::{TrackerEvent, TrackerRequest, TrackerResponse};
use crate::error::{LeechError, Result};
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tracing::debug;
use url::Url;

const PROTOCOL_ID: u64 = 0x41727101980;
const ACTION_CONNECT: u32 = 0;
const ACTION_ANNOUNCE: u32 = 1;
const ACTION_ERROR: u32 = 3;

pub const ANNOUNCE_LEN: usize = 98;
const MAX_PACKET: usize = 2048;

/// Announce over UDP. The caller bounds the whole exchange with a timeout.
pub async fn announce(url: &Url, request: &TrackerRequest) -> Result<TrackerResponse> {
    let addr = resolve(url).await?;
    let bind: SocketAddr = if addr.is_ipv4() {
        ([0u8; 4], 0).into()
    } else {
        ([0u16; 8], 0).into()
    };

    let socket = UdpSocket::bind(bind).await?;
    socket.connect(addr).await?;

    let connection_id = connect(&socket).await?;
    debug!("UDP tracker {} gave connection id {:#x}", addr, connection_id);

    let transaction_id = rand::random::<u32>();
    let packet = announce_packet(request, connection_id, transaction_id, rand::random());
    socket.send(&packet).await?;

    let response = receive(&socket, ACTION_ANNOUNCE, transaction_id).await?;
    TrackerResponse::from_udp(&response)
}

async fn resolve(url: &Url) -> Result<SocketAddr> {
    let host = url
        .host_str()
        .ok_or_else(|| LeechError::Tracker(format!("no host in {}", url)))?;
    let port = url
        .port()
        .ok_or_else(|| LeechError::Tracker(format!("no port in {}", url)))?;

    tokio::net::lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| LeechError::Tracker(format!("cannot resolve {}", host)))
}

async fn connect(socket: &UdpSocket) -> Result<u64> {
    let transaction_id = rand::random::<u32>();

    let mut packet = [0u8; 16];
    packet[0..8].copy_from_slice(&PROTOCOL_ID.to_be_bytes());
    packet[8..12].copy_from_slice(&ACTION_CONNECT.to_be_bytes());
    packet[12..16].copy_from_slice(&transaction_id.to_be_bytes());
    socket.send(&packet).await?;

    let response = receive(socket, ACTION_CONNECT, transaction_id).await?;
    if response.len() < 16 {
        return Err(LeechError::Tracker(format!(
            "connect response too short: {} bytes",
            response.len()
        )));
    }

    let mut id = [0u8; 8];
    id.copy_from_slice(&response[8..16]);
    Ok(u64::from_be_bytes(id))
}

/// Wait for a packet answering `transaction_id`. Stale packets from earlier
/// exchanges are skipped.
async fn receive(socket: &UdpSocket, action: u32, transaction_id: u32) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; MAX_PACKET];

    loop {
        let n = socket.recv(&mut buf).await?;
        if n < 8 {
            continue;
        }

        let got_action = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let got_transaction = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        if got_transaction != transaction_id {
            debug!("Ignoring UDP tracker packet for transaction {:#x}", got_transaction);
            continue;
        }

        if got_action == ACTION_ERROR {
            let message = String::from_utf8_lossy(&buf[8..n]).to_string();
            return Err(LeechError::Tracker(message));
        }
        if got_action != action {
            return Err(LeechError::Tracker(format!(
                "expected action {}, got {}",
                action, got_action
            )));
        }

        buf.truncate(n);
        return Ok(buf);
    }
}

pub fn announce_packet(
    request: &TrackerRequest,
    connection_id: u64,
    transaction_id: u32,
    key: u32,
) -> [u8; ANNOUNCE_LEN] {
    let mut packet = [0u8; ANNOUNCE_LEN];
    packet[0..8].copy_from_slice(&connection_id.to_be_bytes());
    packet[8..12].copy_from_slice(&ACTION_ANNOUNCE.to_be_bytes());
    packet[12..16].copy_from_slice(&transaction_id.to_be_bytes());
    packet[16..36].copy_from_slice(&request.info_hash);
    packet[36..56].copy_from_slice(&request.peer_id);
    packet[56..64].copy_from_slice(&request.downloaded.to_be_bytes());
    packet[64..72].copy_from_slice(&request.left.to_be_bytes());
    packet[72..80].copy_from_slice(&request.uploaded.to_be_bytes());
    packet[80..84].copy_from_slice(&TrackerEvent::udp_code(request.event).to_be_bytes());
    // 84..88: IP address, zero lets the tracker use the sender's
    packet[88..92].copy_from_slice(&key.to_be_bytes());
    packet[92..96].copy_from_slice(&(-1i32).to_be_bytes());
    packet[96..98].copy_from_slice(&request.port.to_be_bytes());
    packet
}
