//! Configuration system for the `ClaimChat` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/claimchat/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use claimchat_proto::message::{RoomId, Timestamp, UserId};
use claimchat_proto::typing::{TYPING_DEBOUNCE, TYPING_EXPIRY};

use crate::client::ConnectOptions;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// The server URL is not a `ws://` or `wss://` URL.
    #[error("invalid server URL {url}: {reason}")]
    InvalidUrl {
        /// The rejected URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    network: NetworkFileConfig,
    chat: ChatFileConfig,
}

/// `[network]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct NetworkFileConfig {
    server_url: Option<String>,
    user_id: Option<String>,
    room_id: Option<String>,
    connect_timeout_secs: Option<u64>,
    auth_timeout_secs: Option<u64>,
    channel_capacity: Option<usize>,
}

/// `[chat]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ChatFileConfig {
    typing_debounce_ms: Option<u64>,
    typing_expiry_ms: Option<u64>,
    timestamp_format: Option<String>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Network --
    /// Server WebSocket URL.
    pub server_url: Option<String>,
    /// User to authenticate as.
    pub user_id: Option<UserId>,
    /// Room (claim) to open on startup.
    pub room_id: Option<RoomId>,
    /// Timeout for the WebSocket handshake.
    pub connect_timeout: Duration,
    /// Timeout for the `Authenticated` reply.
    pub auth_timeout: Duration,
    /// Capacity of the incoming event channel.
    pub channel_capacity: usize,

    // -- Chat --
    /// Quiet period before a typing signal is sent.
    pub typing_debounce: Duration,
    /// How long a remote typing flag lasts without a refresh.
    pub typing_expiry: Duration,
    /// Timestamp display format string (chrono).
    pub timestamp_format: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let connect = ConnectOptions::default();
        Self {
            server_url: None,
            user_id: None,
            room_id: None,
            connect_timeout: connect.connect_timeout,
            auth_timeout: connect.auth_timeout,
            channel_capacity: connect.channel_capacity,
            typing_debounce: TYPING_DEBOUNCE,
            typing_expiry: TYPING_EXPIRY,
            timestamp_format: "%H:%M".to_string(),
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed, or if the resolved server URL is not a WebSocket URL.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Self::resolve(cli, &file)
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let server_url = cli
            .server_url
            .clone()
            .or_else(|| file.network.server_url.clone());
        if let Some(url) = &server_url {
            validate_server_url(url)?;
        }

        Ok(Self {
            server_url,
            user_id: cli
                .user_id
                .clone()
                .or_else(|| file.network.user_id.clone())
                .map(UserId::new),
            room_id: cli
                .room_id
                .clone()
                .or_else(|| file.network.room_id.clone())
                .map(RoomId::new),
            connect_timeout: file
                .network
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            auth_timeout: file
                .network
                .auth_timeout_secs
                .map_or(defaults.auth_timeout, Duration::from_secs),
            channel_capacity: file
                .network
                .channel_capacity
                .unwrap_or(defaults.channel_capacity),
            typing_debounce: file
                .chat
                .typing_debounce_ms
                .map_or(defaults.typing_debounce, Duration::from_millis),
            typing_expiry: file
                .chat
                .typing_expiry_ms
                .map_or(defaults.typing_expiry, Duration::from_millis),
            timestamp_format: cli
                .timestamp_format
                .clone()
                .or_else(|| file.chat.timestamp_format.clone())
                .unwrap_or(defaults.timestamp_format),
        })
    }

    /// Connection options derived from the `[network]` settings.
    #[must_use]
    pub const fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            connect_timeout: self.connect_timeout,
            auth_timeout: self.auth_timeout,
            channel_capacity: self.channel_capacity,
        }
    }

    /// Renders a store timestamp in local time with `timestamp_format`.
    #[must_use]
    pub fn format_timestamp(&self, at: Timestamp) -> String {
        let millis = i64::try_from(at.as_millis()).unwrap_or(i64::MAX);
        chrono::DateTime::from_timestamp_millis(millis).map_or_else(
            || "--:--".to_string(),
            |utc| {
                utc.with_timezone(&chrono::Local)
                    .format(&self.timestamp_format)
                    .to_string()
            },
        )
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "ClaimChat command-line client")]
pub struct CliArgs {
    /// WebSocket URL of the server (e.g. `ws://127.0.0.1:9000/ws`).
    #[arg(long, env = "CLAIMCHAT_URL")]
    pub server_url: Option<String>,

    /// User id to authenticate as.
    #[arg(long, env = "CLAIMCHAT_USER")]
    pub user_id: Option<String>,

    /// Claim id of the room to open.
    #[arg(long, env = "CLAIMCHAT_ROOM")]
    pub room_id: Option<String>,

    /// Path to config file (default: `~/.config/claimchat/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Timestamp display format (chrono format string).
    #[arg(long)]
    pub timestamp_format: Option<String>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "CLAIMCHAT_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/claimchat.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn validate_server_url(raw: &str) -> Result<(), ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidUrl {
        url: raw.to_string(),
        reason,
    };
    let parsed = url::Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    match parsed.scheme() {
        "ws" | "wss" => {}
        other => return Err(invalid(format!("unsupported scheme {other}"))),
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }
    Ok(())
}

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("claimchat").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
