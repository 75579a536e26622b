//! serialport-based link implementation.

use std::io::{ErrorKind, Read};
use std::path::Path;
use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::{info, instrument, trace};

use super::traits::{SerialError, SerialLink};

/// Console rate of the sensor firmware.
pub const BAUD_RATE: u32 = 115_200;

/// Initial read slice; `read_byte` adjusts it per call.
const DEFAULT_TIMEOUT: Duration = Duration::from_millis(100);

/// Raw 8N1 serial console.
///
/// The POSIX backend opens the node with `O_NOCTTY`, applies `cfmakeraw`
/// and sets `CLOCAL | CREAD`, so no canonical processing, echo or signal
/// generation takes place.
pub struct SerialPortLink {
    port: Box<dyn SerialPort>,
    name: String,
}

impl SerialPortLink {
    #[instrument(level = "info", fields(path = %path.display()))]
    pub fn open(path: &Path) -> Result<Self, SerialError> {
        let name = path.to_string_lossy().into_owned();
        let port = serialport::new(name.as_str(), BAUD_RATE)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(DEFAULT_TIMEOUT)
            .open()
            .map_err(|e| SerialError::OpenFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        info!(baud = BAUD_RATE, "Serial port opened");
        Ok(Self { port, name })
    }
}

impl SerialLink for SerialPortLink {
    fn read_byte(&mut self, timeout: Duration) -> Result<Option<u8>, SerialError> {
        if self.port.timeout() != timeout {
            self.port
                .set_timeout(timeout)
                .map_err(|e| SerialError::ReadFailed(e.to_string()))?;
        }

        let mut buf = [0u8; 1];
        match self.port.read(&mut buf) {
            Ok(0) => Ok(None),
            Ok(_) => {
                trace!(byte = buf[0], "Serial byte");
                Ok(Some(buf[0]))
            }
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) =>
            {
                Ok(None)
            }
            Err(e) => Err(SerialError::ReadFailed(e.to_string())),
        }
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}
