//! Configuration loading.
//!
//! Loads `herald.toml` (or `$HERALD_CONFIG_PATH`). Environment variables
//! override file values; file values override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::dispatch::DelayWindow;
use crate::whatsapp::client::DEFAULT_BRIDGE_PORT;
use crate::whatsapp::session::DEFAULT_READY_TIMEOUT;

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "herald.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// WhatsApp bridge connection.
    pub bridge: BridgeConfig,
    /// Input, output and session paths.
    pub paths: PathsConfig,
    /// What to send.
    pub message: MessageConfig,
    /// Pacing and shutdown timing.
    pub dispatch: DispatchConfig,
    /// Log output.
    pub logging: LoggingConfig,
}

/// WhatsApp bridge settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Base URL of the bridge HTTP API.
    pub url: String,
    /// Capacity of the event channel between poller and handler.
    pub event_buffer: usize,
    /// Seconds to wait for the connection to become ready.
    pub ready_timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            url: format!("http://127.0.0.1:{DEFAULT_BRIDGE_PORT}"),
            event_buffer: 64,
            ready_timeout_secs: DEFAULT_READY_TIMEOUT.as_secs(),
        }
    }
}

/// Filesystem paths.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Recipients CSV (`number,name`).
    pub recipients: PathBuf,
    /// Status ledger CSV.
    pub status: PathBuf,
    /// Local session data, deleted on logout.
    pub session_dir: PathBuf,
    /// Where pairing QR images are written.
    pub qr_png: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            recipients: PathBuf::from("numbers.csv"),
            status: PathBuf::from("status.csv"),
            session_dir: default_session_dir(),
            qr_png: PathBuf::from("pairing-qr.png"),
        }
    }
}

/// Message content.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MessageConfig {
    /// Inline template; `{name}` is replaced with the recipient's name.
    pub template: String,
    /// Template file, takes precedence over `template`.
    pub template_file: Option<PathBuf>,
    /// Image (jpg/png) or video (mp4) attached to every message.
    pub media: Option<PathBuf>,
}

impl MessageConfig {
    /// Resolve the template text.
    ///
    /// # Errors
    ///
    /// Returns an error if `template_file` is set but unreadable.
    pub fn template_text(&self) -> anyhow::Result<String> {
        match &self.template_file {
            Some(path) => std::fs::read_to_string(path)
                .with_context(|| format!("failed to read template {}", path.display())),
            None => Ok(self.template.clone()),
        }
    }
}

/// Pacing and shutdown timing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Shortest pause between sends, seconds.
    pub min_delay_secs: u64,
    /// Longest pause between sends, seconds.
    pub max_delay_secs: u64,
    /// Pause after the connection is ready before the first send, seconds.
    pub settle_secs: u64,
    /// How long to keep collecting receipts after the last send, seconds.
    pub drain_timeout_secs: u64,
    /// Pause before disconnecting, seconds.
    pub disconnect_grace_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            min_delay_secs: 60,
            max_delay_secs: 180,
            settle_secs: 3,
            drain_timeout_secs: 300,
            disconnect_grace_secs: 2,
        }
    }
}

impl DispatchConfig {
    /// Pause window between sends.
    pub fn delay_window(&self) -> DelayWindow {
        DelayWindow {
            min: Duration::from_secs(self.min_delay_secs),
            max: Duration::from_secs(self.max_delay_secs),
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Raise verbosity of the bridge/session layer.
    pub debug: bool,
    /// Directory for JSON log files; console only when unset.
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            debug: false,
            dir: None,
        }
    }
}

impl Config {
    /// Load configuration: env vars > TOML file > defaults.
    ///
    /// `explicit` (from the command line) wins over `$HERALD_CONFIG_PATH`.
    /// A missing default file yields defaults; a missing explicit file is an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or the result
    /// fails validation.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        Self::load_with(explicit, |key| std::env::var(key).ok())
    }

    /// [`Config::load`] with a custom env resolver (for testing).
    ///
    /// # Errors
    ///
    /// See [`Config::load`].
    pub fn load_with(
        explicit: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<Self> {
        let (path, required) = match (explicit, env("HERALD_CONFIG_PATH")) {
            (Some(p), _) => (p.to_owned(), true),
            (None, Some(p)) => (PathBuf::from(p), true),
            (None, None) => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };

        let mut config = match std::fs::read_to_string(&path) {
            Ok(contents) => Self::from_toml(&contents)
                .with_context(|| format!("failed to parse config at {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => Self::default(),
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "failed to read config at {}: {e}",
                    path.display()
                ))
            }
        };
        config.apply_overrides(env);
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML string into config.
    ///
    /// # Errors
    ///
    /// Returns an error on invalid TOML or unknown value types.
    pub fn from_toml(toml_str: &str) -> anyhow::Result<Self> {
        toml::from_str(toml_str).context("failed to parse config TOML")
    }

    fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("HERALD_BRIDGE_URL") {
            self.bridge.url = v;
        }
        if env("HERALD_DEBUG").is_some_and(|v| !v.is_empty()) {
            self.logging.debug = true;
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        url::Url::parse(&self.bridge.url)
            .with_context(|| format!("invalid bridge url {:?}", self.bridge.url))?;
        if self.dispatch.min_delay_secs > self.dispatch.max_delay_secs {
            anyhow::bail!(
                "dispatch.min_delay_secs ({}) exceeds dispatch.max_delay_secs ({})",
                self.dispatch.min_delay_secs,
                self.dispatch.max_delay_secs
            );
        }
        if self.bridge.event_buffer == 0 {
            anyhow::bail!("bridge.event_buffer must be at least 1");
        }
        Ok(())
    }
}

/// Resolve the default config directory (`~/.herald/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".herald"))
}

fn default_session_dir() -> PathBuf {
    config_dir()
        .map(|dir| dir.join("session"))
        .unwrap_or_else(|_| PathBuf::from("wa_session"))
}
