//! CLI error types with miette diagnostics.
//!
//! Maps core, settings and store errors into user-facing errors with
//! actionable help text and a process exit code.

use miette::Diagnostic;
use thiserror::Error;

use wearlink_config::ConfigError;
use wearlink_core::{CoreError, StoreError};

/// Process exit codes. Success and a signal-initiated shutdown exit 0.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const PROVISIONING: i32 = 3;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach the remote store: {reason}")]
    #[diagnostic(
        code(wearlink::connection_failed),
        help(
            "Check remote.database_url and network access.\n\
             The bridge itself retries; this error comes from a one-shot command."
        )
    )]
    ConnectionFailed { reason: String },

    #[error("The remote store rejected the request: {message}")]
    #[diagnostic(
        code(wearlink::permission_denied),
        help(
            "Verify the auth token. Set remote.auth_token_env to the name of a\n\
             variable holding it, or WEARLINK_REMOTE__AUTH_TOKEN."
        )
    )]
    PermissionDenied { message: String },

    #[error("Serial device unavailable: {reason}")]
    #[diagnostic(
        code(wearlink::serial),
        help("Check serial.port and that the controller is plugged in.")
    )]
    SerialUnavailable { reason: String },

    // ── Provisioning ─────────────────────────────────────────────────
    #[error("Device is not provisioned: {reason}")]
    #[diagnostic(
        code(wearlink::provisioning_required),
        help(
            "Run: wearlink provision --device-id <ID> --password <PASSWORD>\n\
             Device configuration: {path}"
        )
    )]
    ProvisioningRequired { reason: String, path: String },

    #[error("Device '{device_id}' is already provisioned")]
    #[diagnostic(
        code(wearlink::already_provisioned),
        help("Use --force to replace the existing configuration.")
    )]
    AlreadyProvisioned { device_id: String },

    #[error("Device configuration error: {0}")]
    #[diagnostic(code(wearlink::store))]
    Store(StoreError),

    // ── Settings ─────────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(wearlink::validation))]
    Validation { field: String, reason: String },

    #[error("Settings file not found: {path}")]
    #[diagnostic(
        code(wearlink::no_config),
        help("Create one with: wearlink config init --config {path}")
    )]
    NoConfig { path: String },

    #[error("Settings file already exists: {path}")]
    #[diagnostic(code(wearlink::config_exists), help("Use --force to overwrite it."))]
    ConfigExists { path: String },

    #[error(transparent)]
    #[diagnostic(code(wearlink::config))]
    Config(Box<figment::Error>),

    // ── Runtime ──────────────────────────────────────────────────────
    #[error("The {worker} worker stopped unexpectedly")]
    #[diagnostic(
        code(wearlink::worker_exited),
        help("See the log output above for the cause. The bridge was shut down.")
    )]
    WorkerExited { worker: &'static str },

    #[error("Internal error: {0}")]
    #[diagnostic(code(wearlink::internal))]
    Internal(String),

    // ── IO ───────────────────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. }
            | Self::PermissionDenied { .. }
            | Self::SerialUnavailable { .. } => exit_code::CONNECTION,
            Self::ProvisioningRequired { .. } => exit_code::PROVISIONING,
            Self::Validation { .. }
            | Self::NoConfig { .. }
            | Self::ConfigExists { .. }
            | Self::Config(_) => exit_code::USAGE,
            Self::AlreadyProvisioned { .. }
            | Self::Store(_)
            | Self::WorkerExited { .. }
            | Self::Internal(_)
            | Self::Io(_) => exit_code::GENERAL,
        }
    }
}

// ── Conversions ──────────────────────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::RemoteUnavailable { reason } => CliError::ConnectionFailed { reason },
            CoreError::Timeout { timeout_secs } => CliError::ConnectionFailed {
                reason: format!("timed out after {timeout_secs}s"),
            },
            CoreError::PermissionDenied { message } => CliError::PermissionDenied { message },
            CoreError::SerialUnavailable { reason } => CliError::SerialUnavailable { reason },

            CoreError::Store(e) => CliError::from(e),
            CoreError::ProvisioningRequired { reason } => CliError::ProvisioningRequired {
                reason,
                path: "(see `wearlink config path`)".into(),
            },
            CoreError::AlreadyProvisioned { device_id } => {
                CliError::AlreadyProvisioned { device_id }
            }
            CoreError::Config { message } => CliError::Validation {
                field: "settings".into(),
                reason: message,
            },

            CoreError::WorkerExited { worker } => CliError::WorkerExited { worker },
            CoreError::AlreadyStarted => CliError::Internal("bridge already started".into()),
            CoreError::Internal(msg) => CliError::Internal(msg),
        }
    }
}

impl From<StoreError> for CliError {
    fn from(err: StoreError) -> Self {
        if err.needs_provisioning() {
            let path = match &err {
                StoreError::NotFound { path } | StoreError::Corrupted { path, .. } => {
                    path.display().to_string()
                }
                _ => String::new(),
            };
            return CliError::ProvisioningRequired {
                reason: err.to_string(),
                path,
            };
        }
        CliError::Store(err)
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::NotFound { path } => CliError::NoConfig {
                path: path.display().to_string(),
            },
            ConfigError::Figment(e) => CliError::Config(e),
            ConfigError::Serialization(e) => CliError::Internal(e.to_string()),
            ConfigError::Io(e) => CliError::Io(e),
        }
    }
}

impl From<wearlink_api::Error> for CliError {
    fn from(err: wearlink_api::Error) -> Self {
        CliError::from(CoreError::from(err))
    }
}

/// Map a dialoguer / interactive I/O failure into CliError.
pub fn prompt_err(e: impl std::fmt::Display) -> CliError {
    CliError::Validation {
        field: "interactive".into(),
        reason: format!("prompt failed: {e}"),
    }
}
