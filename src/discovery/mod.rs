//! Service discovery module
//!
//! Sends and receives discovery datagrams over UDP. Framing is one message
//! per datagram; delivery, ordering and retransmission are left to callers.

use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{ToSocketAddrs, UdpSocket};
use tokio::sync::mpsc;

use crate::protocol::{self, CodecError, DiscoveryMessage, MsgType};

/// Largest UDP payload over IPv4
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Discovery errors
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Datagram too large: {0} bytes (max: {1})")]
    DatagramTooLarge(usize, usize),
}

pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// A message received from a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredService {
    /// Address the datagram came from
    pub addr: SocketAddr,
    /// Wire variant the peer used
    pub msg_type: MsgType,
    /// The decoded advertisement
    pub message: DiscoveryMessage,
}

impl DiscoveredService {
    /// Address of the advertised service (sender IP, advertised port)
    pub fn service_addr(&self) -> SocketAddr {
        SocketAddr::new(self.addr.ip(), self.message.port)
    }
}

/// Events from the listener
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    /// An advertisement was received
    ServiceSeen(DiscoveredService),
}

/// Periodically sends this host's advertisement
pub struct Announcer {
    socket: UdpSocket,
}

impl Announcer {
    /// Bind the sending socket. Broadcast is enabled so a broadcast
    /// target can be used directly.
    pub async fn bind(addr: impl ToSocketAddrs) -> DiscoveryResult<Self> {
        let socket = UdpSocket::bind(addr).await?;
        socket.set_broadcast(true)?;
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> DiscoveryResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Encode and send a single datagram
    pub async fn announce_once(
        &self,
        target: SocketAddr,
        message: &DiscoveryMessage,
        msg_type: MsgType,
    ) -> DiscoveryResult<usize> {
        let datagram = protocol::encode(message, msg_type)?;
        if datagram.len() > MAX_DATAGRAM_SIZE {
            return Err(DiscoveryError::DatagramTooLarge(datagram.len(), MAX_DATAGRAM_SIZE));
        }

        let sent = self.socket.send_to(&datagram, target).await?;
        tracing::debug!("Announced {} to {} ({} bytes)", message, target, sent);
        Ok(sent)
    }

    /// Announce every `interval` until `shutdown_rx` fires or is dropped.
    ///
    /// Send failures are logged and the loop keeps going; encoding failures
    /// end it, since every later attempt would fail the same way.
    pub async fn run(
        &self,
        target: SocketAddr,
        message: DiscoveryMessage,
        msg_type: MsgType,
        interval: Duration,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) -> DiscoveryResult<()> {
        let mut ticker = tokio::time::interval(interval);

        tracing::info!("Announcing {} to {} every {:?}", message, target, interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.announce_once(target, &message, msg_type).await {
                        Ok(_) => {}
                        Err(DiscoveryError::Io(e)) => {
                            tracing::warn!("Failed to send announcement to {}: {}", target, e);
                        }
                        Err(e) => return Err(e),
                    }
                }
                _ = shutdown_rx.recv() => {
                    break;
                }
            }
        }

        tracing::info!("Announcer stopped");
        Ok(())
    }
}

/// Receives and decodes advertisements
pub struct Listener {
    socket: UdpSocket,
    buf: Vec<u8>,
}

impl Listener {
    pub async fn bind(addr: impl ToSocketAddrs) -> DiscoveryResult<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self {
            socket,
            buf: vec![0u8; MAX_DATAGRAM_SIZE],
        })
    }

    pub fn local_addr(&self) -> DiscoveryResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Wait for the next datagram that decodes.
    ///
    /// Datagrams that fail to decode are logged and skipped.
    pub async fn recv(&mut self) -> DiscoveryResult<DiscoveredService> {
        loop {
            let (len, addr) = self.socket.recv_from(&mut self.buf).await?;

            match protocol::decode_frame(&self.buf[..len]) {
                Ok(frame) => {
                    tracing::debug!("Received {} from {}", frame.message, addr);
                    return Ok(DiscoveredService {
                        addr,
                        msg_type: frame.msg_type,
                        message: frame.message,
                    });
                }
                Err(e) => {
                    tracing::warn!("Dropping {} byte datagram from {}: {}", len, addr, e);
                }
            }
        }
    }

    /// Forward advertisements to `event_tx` until shutdown or until the
    /// receiving side goes away.
    pub async fn run(
        &mut self,
        event_tx: mpsc::Sender<DiscoveryEvent>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) -> DiscoveryResult<()> {
        tracing::info!("Listening for discovery datagrams on {}", self.local_addr()?);

        loop {
            tokio::select! {
                service = self.recv() => {
                    let event = DiscoveryEvent::ServiceSeen(service?);
                    if event_tx.send(event).await.is_err() {
                        tracing::debug!("Event receiver dropped");
                        break;
                    }
                }
                _ = shutdown_rx.recv() => {
                    break;
                }
            }
        }

        tracing::info!("Listener stopped");
        Ok(())
    }
}
