//! USB serial node discovery.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

use super::traits::SerialError;

/// Directory scanned for device nodes.
pub const DEFAULT_DEVICE_DIR: &str = "/dev";

/// CDC-ACM boards and USB-UART bridges.
pub const SERIAL_PREFIXES: [&str; 2] = ["ttyACM", "ttyUSB"];

/// Return the first USB serial node in `dir`.
///
/// Entries are taken in directory order, which is not sorted.
#[instrument(level = "debug", fields(dir = %dir.display()))]
pub fn find_first_serial_port(dir: &Path) -> Result<PathBuf, SerialError> {
    let not_found = || SerialError::DeviceNotFound {
        dir: dir.to_path_buf(),
    };

    let entries = fs::read_dir(dir).map_err(|e| {
        debug!(error = %e, "Cannot read device directory");
        not_found()
    })?;

    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if SERIAL_PREFIXES.iter().any(|prefix| name.starts_with(prefix)) {
            let path = dir.join(name);
            debug!(path = %path.display(), "Found serial node");
            return Ok(path);
        }
    }

    Err(not_found())
}
