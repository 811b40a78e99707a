// ── Link states ──
//
// Observable liveness of the two links, published through `watch`
// channels so telemetry and callers read the current value without
// locking.

use strum::Display;

/// Remote link lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum RemoteState {
    Disconnected,
    Connecting,
    /// Reachable and reconciled, subscriptions not yet open.
    Synced,
    /// Reconciled and receiving change events.
    Listening,
}

impl RemoteState {
    /// Whether status writes are expected to land.
    pub fn is_online(self) -> bool {
        matches!(self, Self::Synced | Self::Listening)
    }
}

/// Serial link lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum SerialState {
    Disconnected,
    Connecting,
    Connected,
}
