//! Client configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, serde_as};

/// UDP port every DoHome device listens on.
pub const DEFAULT_PORT: u16 = 6091;

/// Tunables shared by sessions, gateways and discovery.
///
/// Durations are (de)serialized as integer milliseconds, so a config can be
/// loaded from JSON such as `{"command_timeout": 800}`; missing fields fall
/// back to [`ClientConfig::default`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use dohome_rs::ClientConfig;
///
/// let config = ClientConfig::default().with_command_timeout(Duration::from_millis(250));
/// assert_eq!(config.port, 6091);
/// assert_eq!(config.command_timeout, Duration::from_millis(250));
/// ```
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Device port used when a session is created from a bare IP.
    pub port: u16,
    /// Receive window for steady-state commands.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub command_timeout: Duration,
    /// Receive window for pings and discovery; devices may need to wake up.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub discovery_timeout: Duration,
    /// Consecutive failures after which a discovered identifier is dropped.
    pub max_failures: u32,
    /// Destination for group frames and discovery pings.
    pub broadcast_address: SocketAddr,
    /// Entries kept in each session's message history.
    pub history_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            port: DEFAULT_PORT,
            command_timeout: Duration::from_millis(500),
            discovery_timeout: Duration::from_millis(3000),
            max_failures: 3,
            broadcast_address: SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), DEFAULT_PORT),
            history_size: 100,
        }
    }
}

impl ClientConfig {
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    pub fn with_max_failures(mut self, max_failures: u32) -> Self {
        self.max_failures = max_failures;
        self
    }

    pub fn with_broadcast_address(mut self, address: SocketAddr) -> Self {
        self.broadcast_address = address;
        self
    }

    pub fn with_history_size(mut self, history_size: usize) -> Self {
        self.history_size = history_size;
        self
    }

    /// Socket address of a device at `ip` on the configured port.
    pub fn device_address(&self, ip: IpAddr) -> SocketAddr {
        SocketAddr::new(ip, self.port)
    }
}
