//! Provisioning configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::serial::DEFAULT_DEVICE_DIR;

/// Sketch directory used when nothing else is configured.
pub const DEFAULT_FIRMWARE_PATH: &str = "firmware/plant_sensor";
/// Board the firmware is built for.
pub const DEFAULT_FQBN: &str = "arduino:samd:nano_33_iot";
/// Relay pin written to `config.h` when not overridden.
pub const DEFAULT_CONTROL_PIN: &str = "2";
/// How long to listen for the registration line.
pub const REGISTRATION_TIMEOUT_SECS: u64 = 60;

pub const ENV_SSID: &str = "FLASH_SSID";
pub const ENV_PASS: &str = "FLASH_PASS";
pub const ENV_TARGET_IP: &str = "FLASH_TARGET_IP";
pub const ENV_CONTROL_PIN: &str = "FLASH_CONTROL_PIN";
pub const ENV_FQBN: &str = "FLASH_FQBN";

/// Configuration for a provisioning run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionConfig {
    /// Firmware sketch directory.
    pub firmware_path: PathBuf,
    /// Directory scanned for serial nodes.
    pub device_dir: PathBuf,
    /// Explicit arduino-cli binary; probed in standard locations if unset.
    pub toolchain_path: Option<PathBuf>,
    /// Fully qualified board name.
    pub fqbn: String,
    /// Network name baked into the firmware.
    pub wifi_ssid: Option<String>,
    /// Network credential baked into the firmware.
    pub wifi_pass: Option<String>,
    /// Gateway address the sensor reports to.
    pub target_ip: Option<String>,
    /// Control pin override, written verbatim (`7`, `A0`, `LED_BUILTIN`).
    pub control_pin: Option<String>,
    /// Registration wait budget in seconds.
    pub registration_timeout_secs: u64,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            firmware_path: PathBuf::from(DEFAULT_FIRMWARE_PATH),
            device_dir: PathBuf::from(DEFAULT_DEVICE_DIR),
            toolchain_path: None,
            fqbn: DEFAULT_FQBN.to_string(),
            wifi_ssid: None,
            wifi_pass: None,
            target_ip: None,
            control_pin: None,
            registration_timeout_secs: REGISTRATION_TIMEOUT_SECS,
        }
    }
}

impl ProvisionConfig {
    /// Defaults overlaid with the `FLASH_*` environment variables.
    pub fn from_env() -> Self {
        Self::default().with_env(|key| std::env::var(key).ok())
    }

    /// Overlay values found through `lookup` onto this configuration.
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(ssid) = lookup(ENV_SSID) {
            self.wifi_ssid = Some(ssid);
        }
        if let Some(pass) = lookup(ENV_PASS) {
            self.wifi_pass = Some(pass);
        }
        if let Some(ip) = lookup(ENV_TARGET_IP) {
            self.target_ip = Some(ip);
        }
        if let Some(pin) = lookup(ENV_CONTROL_PIN) {
            let pin = pin.trim();
            if is_pin_token(pin) {
                self.control_pin = Some(pin.to_string());
            } else {
                warn!(value = %pin, "Ignoring invalid {}", ENV_CONTROL_PIN);
            }
        }
        if let Some(fqbn) = lookup(ENV_FQBN).filter(|v| !v.is_empty()) {
            self.fqbn = fqbn;
        }
        self
    }

    /// Whether a private build variant has to be materialized.
    pub fn has_network_overrides(&self) -> bool {
        self.wifi_ssid.is_some() || self.wifi_pass.is_some() || self.target_ip.is_some()
    }

    /// Pin to bake into the firmware; invalid overrides fall back to the default.
    pub fn control_pin(&self) -> &str {
        self.control_pin
            .as_deref()
            .filter(|pin| is_pin_token(pin))
            .unwrap_or(DEFAULT_CONTROL_PIN)
    }

    pub fn registration_timeout(&self) -> Duration {
        Duration::from_secs(self.registration_timeout_secs)
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ProvisionConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// A pin number or C identifier, safe to paste after `#define`.
fn is_pin_token(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(c) if c.is_ascii_digit() => chars.all(|c| c.is_ascii_digit()),
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}
