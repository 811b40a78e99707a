// ── Core error types ──
//
// Domain-level errors from wearlink-core. Workers never surface raw
// HTTP statuses or serial I/O errors to the binary; the
// `From<wearlink_api::Error>` impl translates transport failures into
// the variants below.

use thiserror::Error;

use crate::store::StoreError;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connectivity ─────────────────────────────────────────────────
    #[error("Cannot reach remote store: {reason}")]
    RemoteUnavailable { reason: String },

    #[error("Remote store rejected credentials: {message}")]
    PermissionDenied { message: String },

    #[error("Remote store timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Serial device unavailable: {reason}")]
    SerialUnavailable { reason: String },

    // ── Local state ──────────────────────────────────────────────────
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Device is not provisioned: {reason}")]
    ProvisioningRequired { reason: String },

    #[error("Device '{device_id}' is already provisioned")]
    AlreadyProvisioned { device_id: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Orchestration ────────────────────────────────────────────────
    #[error("Bridge already started")]
    AlreadyStarted,

    #[error("{worker} worker exited unexpectedly")]
    WorkerExited { worker: &'static str },

    // ── Internal ─────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Whether the failure is worth another attempt after a backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RemoteUnavailable { .. } | Self::Timeout { .. } | Self::SerialUnavailable { .. }
        )
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<wearlink_api::Error> for CoreError {
    fn from(err: wearlink_api::Error) -> Self {
        use wearlink_api::Error as Api;

        match err {
            Api::PermissionDenied { message } => CoreError::PermissionDenied { message },
            Api::Timeout { timeout_secs } => CoreError::Timeout { timeout_secs },
            Api::Transport(e) => CoreError::RemoteUnavailable {
                reason: e.to_string(),
            },
            Api::Remote { status, message } => CoreError::RemoteUnavailable {
                reason: format!("HTTP {status}: {message}"),
            },
            Api::StreamClosed { reason } => CoreError::RemoteUnavailable { reason },
            Api::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid database URL: {e}"),
            },
            Api::SerialOpen { port, reason } => CoreError::SerialUnavailable {
                reason: format!("{port}: {reason}"),
            },
            Api::SerialIo(e) => CoreError::SerialUnavailable {
                reason: e.to_string(),
            },
            Api::SerialClosed => CoreError::SerialUnavailable {
                reason: "device closed".into(),
            },
            Api::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
            Api::UnsupportedOperation(op) => {
                CoreError::Internal(format!("Unsupported remote operation: {op}"))
            }
        }
    }
}
