//! Firmware source selection.
//!
//! With network settings configured, the sketch is copied into a private
//! temporary directory next to a generated `config.h`; otherwise the
//! sketch is built in place.

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, info};

use super::config::ProvisionConfig;

/// Name of the generated header.
pub const CONFIG_HEADER: &str = "config.h";

/// Sketch directory chosen for a build.
#[derive(Debug)]
pub struct PreparedSource {
    path: PathBuf,
    workdir: Option<TempDir>,
}

impl PreparedSource {
    /// Build the sketch where it lives.
    pub fn in_place(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            workdir: None,
        }
    }

    /// Copy `source` into a fresh temporary directory and write
    /// `config.h` from `config`.
    ///
    /// The copy keeps the sketch directory's own name, since arduino-cli
    /// expects the main `.ino` to match its folder.
    pub fn materialize(source: &Path, config: &ProvisionConfig) -> io::Result<Self> {
        let sketch_name = source
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "sketch".into());

        let workdir = tempfile::Builder::new()
            .prefix("plant_sensor_")
            .tempdir()?;
        let path = workdir.path().join(sketch_name);

        copy_tree(source, &path)?;
        fs::write(path.join(CONFIG_HEADER), render_config_header(config))?;

        info!(from = %source.display(), to = %path.display(), "Materialized build variant");
        Ok(Self {
            path,
            workdir: Some(workdir),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_temporary(&self) -> bool {
        self.workdir.is_some()
    }

    /// Remove the temporary copy, if any.
    pub fn cleanup(self) -> io::Result<()> {
        match self.workdir {
            Some(dir) => {
                debug!(path = %dir.path().display(), "Removing build variant");
                dir.close()
            }
            None => Ok(()),
        }
    }
}

/// Render the `config.h` the sketch includes.
pub fn render_config_header(config: &ProvisionConfig) -> String {
    let mut header = String::new();
    let defines = [
        ("WIFI_SSID", &config.wifi_ssid),
        ("WIFI_PASS", &config.wifi_pass),
        ("TARGET_IP", &config.target_ip),
    ];
    for (name, value) in defines {
        if let Some(value) = value {
            let _ = writeln!(header, "#define {} \"{}\"", name, escape_c_string(value));
        }
    }
    let _ = writeln!(header, "#define CONTROL_PIN {}", config.control_pin());
    header
}

fn escape_c_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out
}

fn copy_tree(from: &Path, to: &Path) -> io::Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
