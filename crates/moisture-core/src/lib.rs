//! Moisture-Core: provisioning and telemetry gateway for soil moisture sensors.
//!
//! This crate flashes sensor firmware over a serial link, captures the
//! hardware identifier the sensor announces on its console, and runs the
//! UDP gateway that collects readings and sends commands back.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Identifier**: MAC-shaped hardware identifier helpers
//! - **Serial**: Serial device discovery and byte-level link (serialport, mock)
//! - **Events**: Observer pattern for provisioning progress
//! - **Consumer**: Sink for readings and registration outcomes
//! - **Provision**: Build variant, toolchain and the provisioning workflow
//! - **Gateway**: UDP receive loop, per-device sessions and commands
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use moisture_core::{Gateway, GatewayConfig, ProvisionConfig, Provisioner, TracingConsumer};
//!
//! let consumer = Arc::new(TracingConsumer);
//! let gateway = Gateway::start(&GatewayConfig::default(), Arc::clone(&consumer))
//!     .expect("bind failed");
//!
//! let attempt = Provisioner::new(ProvisionConfig::from_env(), consumer)
//!     .spawn()
//!     .and_then(|handle| handle.join())
//!     .expect("provisioning failed to run");
//!
//! if let Some(id) = attempt.identifier {
//!     gateway.send_digital(&id, true).ok();
//! }
//! ```

pub mod consumer;
pub mod events;
pub mod gateway;
pub mod identifier;
pub mod provision;
pub mod serial;

// Re-exports for convenience
pub use consumer::{RecordingConsumer, SensorConsumer, SensorReading, TracingConsumer};
pub use events::{
    CollectingObserver, NullObserver, ProvisionEvent, ProvisionObserver, ProvisionPhase,
    TracingObserver,
};
pub use gateway::{
    DEFAULT_PORT, Gateway, GatewayConfig, GatewayError, OutputState, SessionRegistry,
};
pub use identifier::{extract_identifier, identifiers_match};
pub use provision::{
    ProvisionConfig, ProvisionError, ProvisionHandle, Provisioner, ProvisioningAttempt,
};
pub use serial::{MockSerial, SerialError, SerialLink, SerialPortLink, find_first_serial_port};
