//! Firmware provisioning.
//!
//! Finds an attached board, optionally bakes network settings into the
//! sketch, builds and flashes it, then waits on the serial console for the
//! board to announce its identifier.

pub mod attempt;
pub mod config;
pub mod probe;
pub mod source;
pub mod toolchain;
pub mod workflow;

pub use attempt::{ProvisionError, ProvisioningAttempt};
pub use config::ProvisionConfig;
pub use probe::{DeviceProbe, SystemProbe};
pub use source::PreparedSource;
pub use toolchain::{ArduinoCli, CommandStatus, Toolchain, ToolchainError};
pub use workflow::{ProvisionHandle, Provisioner};
