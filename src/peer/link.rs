//! Socket task for one peer. It only moves bytes: everything read is
//! forwarded to the orchestrator as [`LinkEvent::Data`], everything that
//! arrives on the outgoing channel is written. Framing and protocol state
//! live in [`super::PeerConnection`].

use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{Sender, UnboundedReceiver};
use tokio::task::JoinHandle;
use tracing::debug;

const READ_CHUNK: usize = 32 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Connected,
    Data(Bytes),
    /// The socket is gone; carries the reason when it was an error
    Closed(Option<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketEvent {
    pub addr: SocketAddr,
    pub kind: LinkEvent,
}

/// Connect to `addr` and pump bytes until either side closes
pub fn spawn_link(
    addr: SocketAddr,
    connect_timeout: Duration,
    outgoing: UnboundedReceiver<Bytes>,
    events: Sender<SocketEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let stream = match tokio::time::timeout(connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                debug!("Failed to connect to {}: {}", addr, e);
                notify(&events, addr, LinkEvent::Closed(Some(e.to_string()))).await;
                return;
            }
            Err(_) => {
                debug!("Connect to {} timed out", addr);
                notify(&events, addr, LinkEvent::Closed(Some("connect timed out".to_string()))).await;
                return;
            }
        };

        if !notify(&events, addr, LinkEvent::Connected).await {
            return;
        }

        let reason = pump(stream, addr, outgoing, &events)
            .await
            .err()
            .map(|e| e.to_string());
        notify(&events, addr, LinkEvent::Closed(reason)).await;
    })
}

/// Shuttle bytes between `stream` and the orchestrator. Returns when the
/// remote end closes, on an I/O error, or when the outgoing channel is
/// dropped (local disconnect).
pub async fn pump<S>(
    stream: S,
    addr: SocketAddr,
    mut outgoing: UnboundedReceiver<Bytes>,
    events: &Sender<SocketEvent>,
) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut buf = BytesMut::with_capacity(READ_CHUNK);

    loop {
        buf.reserve(READ_CHUNK);

        tokio::select! {
            read = reader.read_buf(&mut buf) => {
                if read? == 0 {
                    debug!("{} closed the connection", addr);
                    return Ok(());
                }
                let data = buf.split().freeze();
                if !notify(events, addr, LinkEvent::Data(data)).await {
                    return Ok(());
                }
            }
            message = outgoing.recv() => match message {
                Some(bytes) => writer.write_all(&bytes).await?,
                None => {
                    let _ = writer.shutdown().await;
                    return Ok(());
                }
            },
        }
    }
}

/// Returns false once the orchestrator has stopped listening
async fn notify(events: &Sender<SocketEvent>, addr: SocketAddr, kind: LinkEvent) -> bool {
    events.send(SocketEvent { addr, kind }).await.is_ok()
}
