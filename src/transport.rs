//! UDP request/response transport.
//!
//! A [`Transport`] sends one frame and hands every datagram that arrives
//! within the receive window to a callback until the callback stops it. There
//! are no retries and no acknowledgements at this level; deciding whether a
//! datagram is a usable reply belongs to the caller. Datagrams already queued
//! when an exchange starts are discarded before its frame is sent.

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::ops::ControlFlow;
use std::time::Duration;

use log::{debug, trace};

use crate::errors::Error;
use crate::runtime::{self, AsyncUdpSocket, Instant, Mutex, UdpSocket};

type Result<T> = std::result::Result<T, Error>;

/// Receive buffer size. Longer datagrams are truncated by the socket read.
pub const MAX_DATAGRAM: usize = 1024;

/// One received datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub source: SocketAddr,
    pub bytes: Vec<u8>,
}

impl Datagram {
    pub fn new(source: SocketAddr, bytes: impl Into<Vec<u8>>) -> Self {
        Datagram {
            source,
            bytes: bytes.into(),
        }
    }
}

/// A single-flight datagram exchange.
///
/// Implementations must not let two exchanges read the same socket at once;
/// a stray reply would otherwise reach the wrong waiter.
pub trait Transport: Send + Sync {
    /// Send `frame` to `address`, then pass each datagram received within
    /// `timeout` to `on_reply` until it returns [`ControlFlow::Break`].
    ///
    /// Running out of time is not an error here; the callback's captured
    /// state tells the caller what arrived.
    fn exchange<F>(
        &self,
        address: SocketAddr,
        frame: &str,
        timeout: Duration,
        on_reply: F,
    ) -> impl Future<Output = Result<()>> + Send
    where
        F: FnMut(Datagram) -> ControlFlow<()> + Send;

    /// Send `frame` and wait for exactly one datagram.
    fn request(
        &self,
        address: SocketAddr,
        frame: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<Datagram>> + Send {
        async move {
            let mut reply = None;
            self.exchange(address, frame, timeout, |datagram| {
                reply = Some(datagram);
                ControlFlow::Break(())
            })
            .await?;
            reply.ok_or_else(|| Error::timeout(address, timeout))
        }
    }
}

/// A [`Transport`] over one owned UDP socket.
///
/// Exchanges are serialized on the socket, so a transport shared by many
/// sessions behaves as an in-order request queue. Dropping the transport
/// closes the socket.
pub struct UdpTransport {
    socket: Mutex<UdpSocket>,
    local_addr: SocketAddr,
}

impl UdpTransport {
    /// Bind to `addr` with broadcast enabled.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| Error::socket("bind", e))?;
        socket
            .set_broadcast(true)
            .map_err(|e| Error::socket("set_broadcast", e))?;
        let local_addr = socket
            .local_addr()
            .map_err(|e| Error::socket("local_addr", e))?;
        Ok(UdpTransport {
            socket: Mutex::new(socket),
            local_addr,
        })
    }

    /// Bind to an ephemeral port on all interfaces.
    pub async fn bind_any() -> Result<Self> {
        Self::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)).await
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Transport for UdpTransport {
    async fn exchange<F>(
        &self,
        address: SocketAddr,
        frame: &str,
        timeout: Duration,
        mut on_reply: F,
    ) -> Result<()>
    where
        F: FnMut(Datagram) -> ControlFlow<()> + Send,
    {
        let socket = self.socket.lock().await;
        let mut buffer = [0u8; MAX_DATAGRAM];

        // Late replies to an earlier exchange must not answer this one.
        while let Ok(queued) =
            runtime::timeout(Duration::ZERO, socket.recv_from(&mut buffer)).await
        {
            match queued {
                Ok((size, source)) => debug!(
                    "dropping stale datagram from {}: {}",
                    source,
                    String::from_utf8_lossy(&buffer[..size])
                ),
                Err(e) => {
                    debug!("draining socket failed: {}", e);
                    break;
                }
            }
        }

        trace!("-> {}: {}", address, frame);
        socket
            .send_to(frame.as_bytes(), address)
            .await
            .map_err(|e| Error::socket("send_to", e))?;

        let start = Instant::now();

        while let Some(left) = start.remaining(timeout) {
            let (size, source) = match runtime::timeout(left, socket.recv_from(&mut buffer)).await
            {
                Ok(received) => received.map_err(|e| Error::socket("recv_from", e))?,
                Err(_) => break,
            };
            trace!("<- {}: {}", source, String::from_utf8_lossy(&buffer[..size]));
            if on_reply(Datagram::new(source, &buffer[..size])).is_break() {
                break;
            }
        }

        Ok(())
    }
}
