//! # dohome_rs
//!
//! An async Rust library for controlling DoHome smart lights over UDP.
//!
//! This crate provides a **runtime-agnostic** async API to talk to DoHome bulbs
//! and strips on your local network. It reads and sets color, white balance,
//! brightness and power, and can address several devices with a single frame.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use dohome_rs::{ClientConfig, Color, DeviceSession, UdpTransport};
//!
//! // Works with any async runtime!
//! async fn control_light() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::default();
//!     let transport = Arc::new(UdpTransport::bind_any().await?);
//!     let address = config.device_address("192.168.1.100".parse()?);
//!     let light = DeviceSession::new(address, transport, config);
//!
//!     // The device identifier is resolved by the first call
//!     light.set_rgb(Color::rgb(0, 0, 255), 255).await?;
//!     println!("{:?}", light.get_state().await?);
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Runtime Agnostic**: Works with tokio, async-std, or smol async runtimes
//! - **RGB Colors**: Set any RGB color with [`Color`] and a brightness
//! - **White Balance**: Mix the cold and warm channels with [`ColorTemperature`]
//! - **State Model**: Device replies become whole [`LightState`] values
//! - **Groups**: Address many devices with one frame through a [`Gateway`]
//! - **Discovery**: Find devices on your network with [`discover_devices`]
//! - **Diagnostics**: Per-device [`MessageHistory`] of every frame exchanged
//!
//! ## Communication
//!
//! All communication with DoHome devices occurs over UDP on port 6091. Requests
//! are `key=value` pairs joined by `&`, with the command itself carried as a
//! JSON object in the `op` pair. Every device is addressed by its identifier,
//! the last four characters of the `device_name` it reports to a ping.
//!
//! ## Runtime Selection
//!
//! This library is runtime-agnostic. Select your preferred runtime using feature flags:
//!
//! ### Using tokio (default)
//!
//! ```toml
//! [dependencies]
//! dohome-rs = "0.1"
//! tokio = { version = "1", features = ["rt-multi-thread", "macros"] }
//! ```
//!
//! ### Using async-std
//!
//! ```toml
//! [dependencies]
//! dohome-rs = { version = "0.1", default-features = false, features = ["runtime-async-std"] }
//! async-std = { version = "1.12", features = ["attributes"] }
//! ```
//!
//! ### Using smol
//!
//! ```toml
//! [dependencies]
//! dohome-rs = { version = "0.1", default-features = false, features = ["runtime-smol"] }
//! smol = "2"
//! ```
//!
//! ## Feature Flags
//!
//! - `runtime-tokio` (default): Use the tokio async runtime
//! - `runtime-async-std`: Use the async-std runtime
//! - `runtime-smol`: Use the smol runtime

mod command;
mod config;
pub mod convert;
mod discovery;
mod errors;
mod gateway;
mod history;
mod response;
pub mod runtime;
mod session;
mod state;
mod transport;
mod types;

// Re-export public API
pub use command::{Command, PING_FRAME, Target};
pub use config::{ClientConfig, DEFAULT_PORT};
pub use discovery::{DiscoveredDevice, discover_devices};
pub use errors::Error;
pub use gateway::{Gateway, Group};
pub use history::{HistoryEntry, HistorySummary, MessageHistory, MessageType};
pub use response::{DeviceDescriptor, Response, decode, decode_ping};
pub use session::{DeviceSession, Phase};
pub use state::LightState;
pub use transport::{Datagram, MAX_DATAGRAM, Transport, UdpTransport};
pub use types::{Color, ColorTemperature, LightMode, NativeChannels};
