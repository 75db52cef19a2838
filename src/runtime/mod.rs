//! Runtime-agnostic async primitives.
//!
//! The device layer only needs a UDP socket, a receive deadline and an async
//! mutex. Each of those is provided here by whichever runtime feature is
//! enabled:
//!
//! - `runtime-tokio` (default)
//! - `runtime-async-std`
//! - `runtime-smol`
//!
//! ```toml
//! [dependencies]
//! dohome-rs = { version = "0.1", default-features = false, features = ["runtime-smol"] }
//! ```

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

#[cfg(feature = "runtime-tokio")]
mod tokio_impl;

#[cfg(feature = "runtime-async-std")]
mod async_std_impl;

#[cfg(feature = "runtime-smol")]
mod smol_impl;

#[cfg(feature = "runtime-tokio")]
pub use tokio_impl::*;

#[cfg(feature = "runtime-async-std")]
pub use async_std_impl::*;

#[cfg(feature = "runtime-smol")]
pub use smol_impl::*;

/// Datagram socket operations used by [`crate::UdpTransport`].
///
/// Sockets are never connected: every frame is addressed explicitly so one
/// socket can talk to many devices and to the broadcast address.
pub trait AsyncUdpSocket: Send + Sync + Sized {
    /// Bind to the given local address.
    fn bind(addr: SocketAddr) -> impl Future<Output = io::Result<Self>> + Send;

    /// Send one datagram to `addr`.
    fn send_to(&self, buf: &[u8], addr: SocketAddr)
    -> impl Future<Output = io::Result<usize>> + Send;

    /// Receive one datagram and its source address.
    ///
    /// Datagrams larger than `buf` are truncated.
    fn recv_from(
        &self,
        buf: &mut [u8],
    ) -> impl Future<Output = io::Result<(usize, SocketAddr)>> + Send;

    /// Enable or disable sending to broadcast addresses.
    fn set_broadcast(&self, broadcast: bool) -> io::Result<()>;

    /// The local address this socket is bound to.
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// Run a future with a timeout.
///
/// Returns `Err(TimedOut)` if the timeout expires before the future completes.
/// The future is dropped on expiry; nothing is sent to the peer.
pub async fn timeout<F, T>(duration: Duration, future: F) -> Result<T, TimedOut>
where
    F: Future<Output = T>,
{
    timeout_impl(duration, future).await
}

/// Error returned when a timeout expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimedOut;

impl std::fmt::Display for TimedOut {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "operation timed out")
    }
}

impl std::error::Error for TimedOut {}

/// A monotonic point in time, backed by the active runtime's clock.
#[derive(Debug, Clone, Copy)]
pub struct Instant(InstantInner);

impl Instant {
    pub fn now() -> Self {
        Instant(InstantInner::now())
    }

    pub fn elapsed(&self) -> Duration {
        self.0.elapsed()
    }

    /// Time left until `window` has passed since this instant, if any.
    pub fn remaining(&self, window: Duration) -> Option<Duration> {
        window
            .checked_sub(self.elapsed())
            .filter(|left| !left.is_zero())
    }
}

#[cfg(feature = "runtime-tokio")]
pub use tokio::sync::Mutex;

#[cfg(feature = "runtime-async-std")]
pub use async_std::sync::Mutex;

#[cfg(feature = "runtime-smol")]
pub use async_lock::Mutex;

#[cfg(not(any(
    feature = "runtime-tokio",
    feature = "runtime-async-std",
    feature = "runtime-smol"
)))]
compile_error!(
    "One of \"runtime-tokio\", \"runtime-async-std\", or \"runtime-smol\" features must be enabled"
);

#[cfg(all(feature = "runtime-tokio", feature = "runtime-async-std"))]
compile_error!("Features \"runtime-tokio\" and \"runtime-async-std\" are mutually exclusive");

#[cfg(all(feature = "runtime-tokio", feature = "runtime-smol"))]
compile_error!("Features \"runtime-tokio\" and \"runtime-smol\" are mutually exclusive");

#[cfg(all(feature = "runtime-async-std", feature = "runtime-smol"))]
compile_error!("Features \"runtime-async-std\" and \"runtime-smol\" are mutually exclusive");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remaining_is_none_once_window_passed() {
        let start = Instant::now();
        assert!(start.remaining(Duration::ZERO).is_none());
        assert!(start.remaining(Duration::from_secs(60)).is_some());
    }
}
