//! Device configuration: which devices to watch and what to run per key.
//!
//! The configuration document is a JSON array of device entries. It is
//! decoded once at startup and immutable afterwards; every device entry owns
//! an independent session.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

use crate::keymap::KeyState;

/// Directory of stable device symlinks; bare device names resolve here.
pub const DEV_INPUT_BY_ID: &str = "/dev/input/by-id";

/// Root configuration document: an ordered list of device entries.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Config {
    pub devices: Vec<DeviceConfig>,
}

/// Per-device identity, dispatch policy, and key bindings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DeviceConfig {
    /// Absolute device path, or the name of a symlink under the by-id
    /// directory.
    pub device: String,
    #[serde(default)]
    pub mode: DispatchMode,
    #[serde(default)]
    pub on_unknown_key: UnknownKeyPolicy,
    /// Optional timeout in milliseconds applied to every command this device
    /// launches. Absent means commands run until they exit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_timeout_ms: Option<u64>,
    #[serde(default)]
    pub keys: HashMap<String, KeyBinding>,
}

/// How commands triggered by one device are executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// All serialized-mode devices share one bounded queue and one worker;
    /// commands run strictly in arrival order.
    #[default]
    Serialized,
    /// Every triggering event spawns an independent, cancellable execution.
    Concurrent,
}

/// What to do with a hardware key code missing from the translation table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownKeyPolicy {
    /// Log the code and drop the event.
    #[default]
    Skip,
    /// Treat it as a configuration/hardware mismatch and stop the process.
    Abort,
}

/// Commands for the three key transitions. An empty argv means no action for
/// that transition.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct KeyBinding {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub down: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub up: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hold: Vec<String>,
}

impl Config {
    /// Load and parse the configuration document.
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;

        Ok(config)
    }

    /// Write the configuration document back out.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, json)
            .await
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }
}

impl DeviceConfig {
    /// Resolve the configured identity to the path the session will open.
    ///
    /// Absolute identities are used unchanged; anything else names a symlink
    /// under [`DEV_INPUT_BY_ID`], keeping only the final path component.
    pub fn device_path(&self) -> PathBuf {
        let device = Path::new(&self.device);
        if device.is_absolute() {
            return device.to_path_buf();
        }
        let name = device.file_name().map(Path::new).unwrap_or(device);
        Path::new(DEV_INPUT_BY_ID).join(name)
    }

    /// Look up the binding for a symbolic key name. A missing entry is not
    /// an error; the key simply does nothing.
    pub fn binding(&self, key: &str) -> Option<&KeyBinding> {
        self.keys.get(key)
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_ms.map(Duration::from_millis)
    }
}

impl KeyBinding {
    /// The argv configured for one transition; `None` when empty.
    pub fn argv_for(&self, state: KeyState) -> Option<&[String]> {
        let argv = match state {
            KeyState::Down => &self.down,
            KeyState::Up => &self.up,
            KeyState::Hold => &self.hold,
        };
        (!argv.is_empty()).then_some(argv.as_slice())
    }
}
