//! Device discovery seam used by the provisioning workflow.

use std::path::{Path, PathBuf};

use crate::serial::{SerialError, SerialLink, SerialPortLink, find_first_serial_port};

/// Finds and opens the board being provisioned.
pub trait DeviceProbe: Send + Sync {
    /// Path of the first USB serial node.
    fn locate(&self) -> Result<PathBuf, SerialError>;

    /// Open a console on `path`.
    fn open(&self, path: &Path) -> Result<Box<dyn SerialLink>, SerialError>;
}

/// Probe backed by the real device directory and serial ports.
#[derive(Debug, Clone)]
pub struct SystemProbe {
    device_dir: PathBuf,
}

impl SystemProbe {
    pub fn new(device_dir: impl Into<PathBuf>) -> Self {
        Self {
            device_dir: device_dir.into(),
        }
    }
}

impl DeviceProbe for SystemProbe {
    fn locate(&self) -> Result<PathBuf, SerialError> {
        find_first_serial_port(&self.device_dir)
    }

    fn open(&self, path: &Path) -> Result<Box<dyn SerialLink>, SerialError> {
        Ok(Box::new(SerialPortLink::open(path)?))
    }
}
