//! Daemon settings for the wearlink bridge.
//!
//! Layered TOML + environment settings (`figment`), path resolution,
//! auth-token resolution, and translation to the runtime types of
//! `wearlink-core` and `wearlink-api`. The persisted device document
//! (`config.json`) is not handled here; see `wearlink_core::ConfigStore`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use wearlink_api::{FirebaseConfig, SerialConfig};
use wearlink_core::{BridgeConfig, DeviceLayout};

/// Prefix of environment overrides; `__` separates nesting levels.
pub const ENV_PREFIX: &str = "WEARLINK_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("settings file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("failed to serialize settings: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("settings loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML settings structs ───────────────────────────────────────────

/// Top-level daemon settings.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub device: DeviceSection,
    pub serial: SerialSection,
    pub remote: RemoteSection,
    pub shutdown: ShutdownSection,
    pub layout: DeviceLayout,
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DeviceSection {
    /// Persisted device document. Defaults to `<data dir>/config.json`.
    pub config_file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SerialSection {
    pub port: String,
    pub baud_rate: u32,
    pub read_timeout_ms: u64,
    /// Wait after opening before the first command.
    pub settle_ms: u64,
    /// Minimum gap between two commands.
    pub command_spacing_ms: u64,
    pub reconnect_backoff_secs: u64,
}

impl Default for SerialSection {
    fn default() -> Self {
        Self {
            port: "/dev/ttyACM0".into(),
            baud_rate: 9600,
            read_timeout_ms: 1000,
            settle_ms: 2000,
            command_spacing_ms: 50,
            reconnect_backoff_secs: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RemoteSection {
    /// Realtime database URL, e.g. `https://<project>.firebaseio.com`.
    pub database_url: Option<String>,
    /// Parent of all device documents.
    pub root: String,
    /// Auth token (plaintext; prefer `auth_token_env`).
    pub auth_token: Option<String>,
    /// Environment variable holding the auth token.
    pub auth_token_env: Option<String>,
    pub timeout_secs: u64,
    pub reconnect_backoff_secs: u64,
    pub heartbeat_secs: u64,
    /// Temperature log interval. `0` disables snapshots.
    pub snapshot_secs: u64,
}

impl Default for RemoteSection {
    fn default() -> Self {
        Self {
            database_url: None,
            root: "devices".into(),
            auth_token: None,
            auth_token_env: None,
            timeout_secs: 10,
            reconnect_backoff_secs: 10,
            heartbeat_secs: 5,
            snapshot_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownSection {
    pub timeout_secs: u64,
}

impl Default for ShutdownSection {
    fn default() -> Self {
        Self { timeout_secs: 2 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Also write daily-rolling log files here.
    pub directory: Option<PathBuf>,
    /// Write the log files as JSON lines.
    pub json: bool,
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("io", "wearlink", "wearlink")
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("wearlink");
    p
}

/// Resolve the settings file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join("wearlink.toml"),
        |dirs| dirs.config_dir().join("wearlink.toml"),
    )
}

/// Directory for daemon-owned state such as the device document.
pub fn data_dir() -> PathBuf {
    project_dirs().map_or_else(dirs_fallback, |dirs| dirs.data_dir().to_path_buf())
}

// ── Loading ─────────────────────────────────────────────────────────

/// Load settings from defaults, the TOML file, and the environment.
///
/// With `explicit = Some(path)` the file must exist; the default path
/// may be absent.
pub fn load(explicit: Option<&Path>) -> Result<Settings, ConfigError> {
    let path = match explicit {
        Some(path) if !path.exists() => {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }
        Some(path) => path.to_path_buf(),
        None => config_path(),
    };

    let settings: Settings = Figment::new()
        .merge(Serialized::defaults(Settings::default()))
        .merge(Toml::file(&path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()?;
    settings.validate()?;
    Ok(settings)
}

// ── Saving ──────────────────────────────────────────────────────────

/// Serialize settings to TOML and write them to `path`.
pub fn save(settings: &Settings, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, settings.to_toml()?)?;
    Ok(())
}

impl Settings {
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Copy safe to print: the plaintext token is masked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.remote.auth_token.is_some() {
            copy.remote.auth_token = Some("********".into());
        }
        copy
    }

    // ── Validation ───────────────────────────────────────────────────

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.serial.port.trim().is_empty() {
            return Err(invalid("serial.port", "must not be empty"));
        }
        if self.serial.baud_rate == 0 {
            return Err(invalid("serial.baud_rate", "must be positive"));
        }
        for (field, value) in [
            ("serial.read_timeout_ms", self.serial.read_timeout_ms),
            ("serial.reconnect_backoff_secs", self.serial.reconnect_backoff_secs),
            ("remote.timeout_secs", self.remote.timeout_secs),
            ("remote.reconnect_backoff_secs", self.remote.reconnect_backoff_secs),
            ("remote.heartbeat_secs", self.remote.heartbeat_secs),
            ("shutdown.timeout_secs", self.shutdown.timeout_secs),
        ] {
            if value == 0 {
                return Err(invalid(field, "must be positive"));
            }
        }
        if let Some(ref raw) = self.remote.database_url {
            parse_database_url(raw)?;
        }
        if self.remote.root.trim_matches('/').is_empty() {
            return Err(invalid("remote.root", "must not be empty"));
        }
        self.validate_layout()
    }

    fn validate_layout(&self) -> Result<(), ConfigError> {
        let groups = &self.layout.groups;
        if groups.is_empty() {
            return Err(invalid("layout.groups", "at least one group is required"));
        }
        let mut ids = HashSet::new();
        let mut channels = HashSet::new();
        for group in groups {
            if group.id.is_empty() || group.channel.is_empty() {
                return Err(invalid("layout.groups", "group id and channel must not be empty"));
            }
            if group.channel.contains(':') {
                return Err(invalid(
                    "layout.groups",
                    format!("channel '{}' must not contain ':'", group.channel),
                ));
            }
            if !ids.insert(group.id.as_str()) {
                return Err(invalid("layout.groups", format!("duplicate group id '{}'", group.id)));
            }
            if !channels.insert(group.channel.as_str()) {
                return Err(invalid(
                    "layout.groups",
                    format!("duplicate channel '{}'", group.channel),
                ));
            }
        }
        Ok(())
    }

    // ── Translation ──────────────────────────────────────────────────

    /// Path of the persisted device document.
    pub fn device_config_path(&self) -> PathBuf {
        self.device
            .config_file
            .clone()
            .unwrap_or_else(|| data_dir().join("config.json"))
    }

    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            layout: self.layout.clone(),
            read_timeout: Duration::from_millis(self.serial.read_timeout_ms),
            command_spacing: Duration::from_millis(self.serial.command_spacing_ms),
            serial_backoff: Duration::from_secs(self.serial.reconnect_backoff_secs),
            remote_backoff: Duration::from_secs(self.remote.reconnect_backoff_secs),
            heartbeat_interval: Duration::from_secs(self.remote.heartbeat_secs),
            snapshot_interval: Duration::from_secs(self.remote.snapshot_secs),
            shutdown_timeout: Duration::from_secs(self.shutdown.timeout_secs),
        }
    }

    pub fn serial_config(&self) -> SerialConfig {
        SerialConfig {
            settle: Duration::from_millis(self.serial.settle_ms),
            ..SerialConfig::new(self.serial.port.clone(), self.serial.baud_rate)
        }
    }

    /// Remote client settings for the document of `device_id`.
    pub fn firebase_config(&self, device_id: &str) -> Result<FirebaseConfig, ConfigError> {
        let raw = self
            .remote
            .database_url
            .as_deref()
            .ok_or_else(|| invalid("remote.database_url", "not configured"))?;
        let url = parse_database_url(raw)?;
        let namespace = format!("{}/{device_id}", self.remote.root.trim_matches('/'));

        let mut config = FirebaseConfig::new(url, namespace)
            .with_timeout(Duration::from_secs(self.remote.timeout_secs));
        if let Some(token) = resolve_auth_token(&self.remote) {
            config = config.with_auth(token);
        }
        Ok(config)
    }
}

fn parse_database_url(raw: &str) -> Result<url::Url, ConfigError> {
    let url: url::Url = raw
        .parse()
        .map_err(|_| invalid("remote.database_url", format!("invalid URL: {raw}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(
            "remote.database_url",
            format!("expected http(s) URL, got '{}'", url.scheme()),
        ));
    }
    Ok(url)
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve the auth token: the variable named by `auth_token_env` first,
/// then the (possibly env-layered) `auth_token` value. `None` means the
/// database is accessed unauthenticated.
pub fn resolve_auth_token(remote: &RemoteSection) -> Option<SecretString> {
    // 1. Named env var
    if let Some(ref env_name) = remote.auth_token_env {
        if let Ok(val) = std::env::var(env_name) {
            if !val.is_empty() {
                return Some(SecretString::from(val));
            }
        }
    }

    // 2. Settings value
    remote
        .auth_token
        .as_ref()
        .filter(|t| !t.is_empty())
        .map(|t| SecretString::from(t.clone()))
}

// ── Tests ───────────────────────────────────────────────────────────
