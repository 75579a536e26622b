//! Serial layer: port discovery and raw byte reads.

pub mod locator;
pub mod mock;
pub mod port;
pub mod traits;

pub use locator::{DEFAULT_DEVICE_DIR, SERIAL_PREFIXES, find_first_serial_port};
pub use mock::MockSerial;
pub use port::{BAUD_RATE, SerialPortLink};
pub use traits::{SerialError, SerialLink};
