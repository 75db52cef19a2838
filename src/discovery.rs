//! Device discovery via UDP broadcast.

use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::sync::Arc;

use log::{debug, info};

use crate::command::PING_FRAME;
use crate::config::ClientConfig;
use crate::errors::Error;
use crate::response::decode_ping;
use crate::session::DeviceSession;
use crate::transport::{Datagram, Transport};

type Result<T> = std::result::Result<T, Error>;

/// A DoHome device that answered a broadcast ping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    /// Source address of the ping reply.
    pub address: SocketAddr,
    /// Full `device_name` reported by the device.
    pub name: String,
    /// Device identifier used to address commands.
    pub sid: String,
    /// Remaining `key=value` pairs of the reply.
    pub attributes: BTreeMap<String, String>,
}

impl DiscoveredDevice {
    /// Convert this device into a [`DeviceSession`] with its identifier
    /// already known.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let transport = Arc::new(UdpTransport::bind_any().await?);
    /// let config = ClientConfig::default();
    /// for device in discover_devices(transport.as_ref(), &config).await? {
    ///     let session = device.into_session(Arc::clone(&transport), config.clone())?;
    ///     println!("{}: {:?}", session.address(), session.get_state().await?);
    /// }
    /// ```
    pub fn into_session<T: Transport>(
        self,
        transport: Arc<T>,
        config: ClientConfig,
    ) -> Result<DeviceSession<T>> {
        let address = config.device_address(self.address.ip());
        DeviceSession::with_identifier(address, &self.sid, transport, config)
    }
}

/// Ping the configured broadcast address and collect every device that
/// answers within the discovery window.
///
/// Devices are returned in the order their first reply arrived; repeated
/// replies for the same identifier are ignored, as are replies that are not
/// valid ping answers.
///
/// # Examples
///
/// ```ignore
/// use dohome_rs::{ClientConfig, UdpTransport, discover_devices};
///
/// let transport = UdpTransport::bind_any().await?;
/// let devices = discover_devices(&transport, &ClientConfig::default()).await?;
/// println!("Found {} devices", devices.len());
/// for device in devices {
///     println!("  {} - {}", device.address, device.name);
/// }
/// ```
pub async fn discover_devices<T: Transport>(
    transport: &T,
    config: &ClientConfig,
) -> Result<Vec<DiscoveredDevice>> {
    debug!("discovering devices via {}", config.broadcast_address);

    let mut seen = HashSet::new();
    let mut devices = Vec::new();
    transport
        .exchange(
            config.broadcast_address,
            PING_FRAME,
            config.discovery_timeout,
            |datagram: Datagram| {
                match decode_ping(&datagram.bytes) {
                    Ok(descriptor) if seen.insert(descriptor.sid.clone()) => {
                        devices.push(DiscoveredDevice {
                            address: datagram.source,
                            name: descriptor.name,
                            sid: descriptor.sid,
                            attributes: descriptor.attributes,
                        });
                    }
                    Ok(descriptor) => debug!("repeated reply from {}", descriptor.sid),
                    Err(e) => debug!("ignoring datagram from {}: {}", datagram.source, e),
                }
                ControlFlow::Continue(())
            },
        )
        .await?;

    info!("discovered {} devices", devices.len());
    Ok(devices)
}
