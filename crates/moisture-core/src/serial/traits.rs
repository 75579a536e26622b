//! Serial link abstraction.
//!
//! Defines the `SerialLink` trait for reading a device's console,
//! allowing different implementations (serialport, mock).

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SerialError {
    #[error("No USB serial device found in {dir}")]
    DeviceNotFound { dir: PathBuf },

    #[error("Failed to open {path}: {message}")]
    OpenFailed { path: PathBuf, message: String },

    #[error("Read failed: {0}")]
    ReadFailed(String),
}

/// Byte-at-a-time access to a device console.
///
/// The link is released when dropped.
pub trait SerialLink: Send {
    /// Read one byte, waiting at most `timeout`.
    ///
    /// Returns `Ok(None)` when nothing arrived within the slice.
    fn read_byte(&mut self, timeout: Duration) -> Result<Option<u8>, SerialError>;

    /// Path or name of the underlying device.
    fn name(&self) -> String;
}
