//! Telemetry and command gateway.
//!
//! Receives sensor datagrams, keeps a session per device and sends
//! commands back to the last address a device was seen at.

pub mod packet;
pub mod registry;
pub mod server;

use std::io;
use std::net::{Ipv4Addr, SocketAddr};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use packet::{READING_RANGE, parse_output_state, parse_reading};
pub use registry::{Attribution, DeviceSession, MAX_SESSIONS, OutputState, SessionRegistry};
pub use server::{Gateway, PacketOutcome, handle_packet};

/// Well-known sensor port.
pub const DEFAULT_PORT: u16 = 12345;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Failed to bind {addr}: {source}")]
    SocketBindFailed {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("Unknown identifier: {0}")]
    UnknownIdentifier(String),

    #[error("Send to {id} failed: {message}")]
    SendFailed { id: String, message: String },

    #[error("Failed to start receive thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Address the sensor socket binds to.
    pub bind_addr: SocketAddr,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: GatewayConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
