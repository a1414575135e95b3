use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Main configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub hub: HubConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

/// Per-session settings, captured when a session is created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HubConfig {
    /// How long a session survives without an operator
    #[serde(default = "default_grace_period")]
    pub grace_period_ms: u64,

    /// Outbound messages buffered per connection before it is dropped
    #[serde(default = "default_viewer_buffer")]
    pub viewer_buffer: usize,

    #[serde(default = "default_command_buffer")]
    pub command_buffer: usize,

    /// Digits in a generated PIN
    #[serde(default = "default_pin_length")]
    pub pin_length: usize,
}

fn default_grace_period() -> u64 {
    30_000
}
fn default_viewer_buffer() -> usize {
    64
}
fn default_command_buffer() -> usize {
    256
}
fn default_pin_length() -> usize {
    4
}

const MIN_PIN_LENGTH: usize = 3;
const MAX_PIN_LENGTH: usize = 9;

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: default_grace_period(),
            viewer_buffer: default_viewer_buffer(),
            command_buffer: default_command_buffer(),
            pin_length: default_pin_length(),
        }
    }
}

impl HubConfig {
    /// Clamp values that would make the hub unusable (zero-sized channels, empty PINs).
    #[must_use]
    pub fn sanitized(mut self) -> Self {
        if self.viewer_buffer == 0 {
            warn!("hub.viewerBuffer must be at least 1, using 1");
            self.viewer_buffer = 1;
        }
        if self.command_buffer == 0 {
            warn!("hub.commandBuffer must be at least 1, using 1");
            self.command_buffer = 1;
        }
        let pin_length = self.pin_length.clamp(MIN_PIN_LENGTH, MAX_PIN_LENGTH);
        if pin_length != self.pin_length {
            warn!(
                "hub.pinLength {} outside {MIN_PIN_LENGTH}..={MAX_PIN_LENGTH}, using {pin_length}",
                self.pin_length
            );
            self.pin_length = pin_length;
        }
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Unix socket path, defaults to `$XDG_RUNTIME_DIR/chorale.sock`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_path: Option<PathBuf>,

    /// Extra TCP listen address for displays on other machines, e.g. `0.0.0.0:7777`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_listen: Option<String>,
}

impl Config {
    /// Load config from file. A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or contains invalid JSON.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        super::validation::warn_unknown_fields(&content, "config.json");
        let mut config: Config = serde_json::from_str(&content)?;
        config.hub = config.hub.sanitized();
        Ok(config)
    }

    /// Save config to file.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails or the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
