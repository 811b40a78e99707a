use thiserror::Error;

/// Top-level error type for the `wearlink-api` crate.
///
/// Covers every failure mode of the two capabilities: the remote store
/// (HTTP transport, server rejections, event stream) and the serial link.
/// `wearlink-core` maps these into domain diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Remote transport ────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// The store answered with a non-success status.
    #[error("Remote store error (HTTP {status}): {message}")]
    Remote { status: u16, message: String },

    /// The store rejected our credentials.
    #[error("Permission denied by remote store: {message}")]
    PermissionDenied { message: String },

    // ── Event stream ────────────────────────────────────────────────
    /// The server closed or cancelled an event stream.
    #[error("Event stream closed: {reason}")]
    StreamClosed { reason: String },

    // ── Serial ──────────────────────────────────────────────────────
    /// Opening the serial port failed (unplugged, busy, no permission).
    #[error("Cannot open serial port {port}: {reason}")]
    SerialOpen { port: String, reason: String },

    /// I/O failure on an open serial port.
    #[error("Serial I/O error: {0}")]
    SerialIo(#[from] std::io::Error),

    /// The device handle was used after it was closed or hit EOF.
    #[error("Serial device closed")]
    SerialClosed,

    // ── Data ────────────────────────────────────────────────────────
    /// JSON (de)serialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    // ── Capability ──────────────────────────────────────────────────
    /// Operation not supported by this transport.
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(&'static str),
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Remote { status, .. } => *status >= 500 || *status == 429,
            Self::Timeout { .. }
            | Self::StreamClosed { .. }
            | Self::SerialOpen { .. }
            | Self::SerialIo(_)
            | Self::SerialClosed => true,
            _ => false,
        }
    }

    /// Returns `true` if the error came from the serial side.
    pub fn is_serial(&self) -> bool {
        matches!(
            self,
            Self::SerialOpen { .. } | Self::SerialIo(_) | Self::SerialClosed
        )
    }
}
