//! Configuration system for the `ClaimChat` server.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/claimchat-server/config.toml`)
//! 4. Compiled defaults
//!
//! The config file also seeds the in-memory claim directory through its
//! `[[claims]]` table.

use std::path::PathBuf;
use std::time::Duration;

use claimchat_proto::message::{RoomId, UserId};

use crate::claims::Participants;
use crate::server::{DEFAULT_DEDUP_WINDOW, DEFAULT_MAX_FRAME_SIZE, DEFAULT_PRESENCE_GRACE, ServerSettings};

/// Errors that can occur when loading server configuration.
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

    /// A `[[claims]]` entry does not name two distinct participants.
    #[error("claim {room_id} must list exactly two distinct, non-empty participants")]
    InvalidClaim {
        /// The offending claim id.
        room_id: String,
    },
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure for the server.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerConfigFile {
    server: ServerFileConfig,
    claims: Vec<ClaimFileEntry>,
}

/// `[server]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_addr: Option<String>,
    max_frame_size: Option<usize>,
    presence_grace_ms: Option<u64>,
    dedup_window_secs: Option<u64>,
}

/// One `[[claims]]` entry.
#[derive(Debug, serde::Deserialize)]
struct ClaimFileEntry {
    room_id: String,
    participants: Vec<String>,
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments for the server.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "ClaimChat messaging server")]
pub struct ServerCliArgs {
    /// Address to bind the server to.
    #[arg(short, long, env = "CLAIMCHAT_ADDR")]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/claimchat-server/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Maximum accepted frame size in bytes.
    #[arg(long)]
    pub max_frame_size: Option<usize>,

    /// Milliseconds a closed connection still counts as online.
    #[arg(long)]
    pub presence_grace_ms: Option<u64>,

    /// Seconds a submitted temp id is remembered for de-duplication.
    #[arg(long)]
    pub dedup_window_secs: Option<u64>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "CLAIMCHAT_LOG")]
    pub log_level: String,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// A claim seeded into the in-memory directory at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimSeed {
    /// The claim id, used as room id.
    pub room_id: RoomId,
    /// The claim's two participants.
    pub participants: Participants,
}

/// Fully resolved server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to (e.g., `0.0.0.0:9000`).
    pub bind_addr: String,
    /// Runtime tunables handed to the chat state.
    pub settings: ServerSettings,
    /// Claims to seed the directory with.
    pub claims: Vec<ClaimSeed>,
    /// Log level filter string.
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9000".to_string(),
            settings: ServerSettings::default(),
            claims: Vec::new(),
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// If no `--config` is given, the default path is tried and missing file
    /// is treated as empty config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed,
    /// or if a claim entry is malformed.
    pub fn load(cli: &ServerCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Self::resolve(cli, &file)
    }

    /// Resolve a `ServerConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    fn resolve(cli: &ServerCliArgs, file: &ServerConfigFile) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let presence_grace = cli
            .presence_grace_ms
            .or(file.server.presence_grace_ms)
            .map_or(DEFAULT_PRESENCE_GRACE, Duration::from_millis);
        let dedup_window = cli
            .dedup_window_secs
            .or(file.server.dedup_window_secs)
            .map_or(DEFAULT_DEDUP_WINDOW, Duration::from_secs);

        Ok(Self {
            bind_addr: cli
                .bind
                .clone()
                .or_else(|| file.server.bind_addr.clone())
                .unwrap_or(defaults.bind_addr),
            settings: ServerSettings {
                max_frame_size: cli
                    .max_frame_size
                    .or(file.server.max_frame_size)
                    .unwrap_or(DEFAULT_MAX_FRAME_SIZE),
                presence_grace,
                dedup_window,
            },
            claims: file
                .claims
                .iter()
                .map(ClaimFileEntry::to_seed)
                .collect::<Result<_, _>>()?,
            log_level: cli.log_level.clone(),
        })
    }
}

impl ClaimFileEntry {
    fn to_seed(&self) -> Result<ClaimSeed, ConfigError> {
        let invalid = || ConfigError::InvalidClaim {
            room_id: self.room_id.clone(),
        };
        if self.room_id.is_empty() {
            return Err(invalid());
        }
        let [first, second] = self.participants.as_slice() else {
            return Err(invalid());
        };
        let participants =
            Participants::new(UserId::new(first.as_str()), UserId::new(second.as_str()))
                .ok_or_else(invalid)?;
        Ok(ClaimSeed {
            room_id: RoomId::new(self.room_id.as_str()),
            participants,
        })
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file for the server.
fn load_config_file(
    explicit_path: Option<&std::path::Path>,
) -> Result<ServerConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ServerConfigFile::default());
        };
        config_dir.join("claimchat-server").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ServerConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
