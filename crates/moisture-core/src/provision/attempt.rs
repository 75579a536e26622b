//! Record of a single provisioning run.

use std::path::PathBuf;

use thiserror::Error;

/// Why a run ended without a confirmed identifier.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProvisionError {
    #[error("No serial device found")]
    DeviceNotFound,

    #[error("Failed to open serial device: {0}")]
    SerialOpenFailed(String),

    #[error("Compile failed: {0}")]
    CompileFailed(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("No registration received within {secs}s")]
    RegistrationTimeout { secs: u64 },

    #[error("Serial read error: {0}")]
    SerialReadFailed(String),

    #[error("Failed to start provisioning thread: {0}")]
    Spawn(String),

    #[error("Provisioning thread panicked")]
    Panicked,
}

/// Everything learned during one run.
#[derive(Debug, Clone, Default)]
pub struct ProvisioningAttempt {
    /// Node found by the first device search.
    pub serial_path: Option<PathBuf>,
    /// Temporary build variant, if one was materialized.
    pub work_dir: Option<PathBuf>,
    /// `Some(true)` after a successful compile; `None` if not attempted.
    pub compiled: Option<bool>,
    /// Upload outcome; never stops the run.
    pub uploaded: Option<bool>,
    /// Non-fatal upload failure.
    pub upload_error: Option<ProvisionError>,
    /// Node used for the registration wait.
    pub registration_path: Option<PathBuf>,
    /// Confirmed identifier.
    pub identifier: Option<String>,
    /// Why no identifier was confirmed.
    pub failure: Option<ProvisionError>,
}

impl ProvisioningAttempt {
    pub fn is_registered(&self) -> bool {
        self.identifier.is_some()
    }
}
