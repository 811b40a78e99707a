//! Remote store capability.
//!
//! The bridge treats the remote database as an opaque, device-scoped
//! key/value tree: every path handed to a [`RemoteLink`] is relative to the
//! device namespace (e.g. `"control"`, `"connection/last_seen"`, `""` for the
//! namespace root). Subscriptions deliver [`RemoteEvent`]s through a bounded
//! channel owned by a [`Subscription`].

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Error;

// ── RemoteLink ───────────────────────────────────────────────────────

/// Path-scoped access to the remote device document.
#[async_trait]
pub trait RemoteLink: Send + Sync {
    /// Acquire the capability: verify the store is reachable and that our
    /// credentials are accepted. Called once per (re)connection attempt.
    async fn connect(&self) -> Result<(), Error>;

    /// Read the value at `path`. `Ok(None)` when nothing is stored there.
    async fn get(&self, path: &str) -> Result<Option<Value>, Error>;

    /// Replace the value at `path`.
    async fn set(&self, path: &str, value: Value) -> Result<(), Error>;

    /// Merge `fields` into the object at `path`. Keys may be multi-segment
    /// relative paths (`"sensors/sensor_01/temp"`).
    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<(), Error>;

    /// Stream changes below `path`. The first event is a `Put` at `/`
    /// carrying the current subtree.
    async fn subscribe(&self, path: &str) -> Result<Subscription, Error>;

    /// Register a last-will write applied by the server if this client
    /// disappears without notice. Optional; transports without server-side
    /// disconnect hooks return [`Error::UnsupportedOperation`].
    async fn on_disconnect_set(&self, path: &str, value: Value) -> Result<(), Error> {
        let _ = (path, value);
        Err(Error::UnsupportedOperation("on_disconnect_set"))
    }
}

/// Join two relative store paths, ignoring empty segments and stray slashes.
///
/// `child(path).set(v)` in store terms is `set(&join(path, child), v)`.
pub fn join(base: &str, child: &str) -> String {
    base.split('/')
        .chain(child.split('/'))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

// ── RemoteEvent ──────────────────────────────────────────────────────

/// How an event modifies the subscribed subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Replace the value at `path` (a `null` payload deletes it).
    Put,
    /// Merge the children of the payload object into `path`.
    Patch,
}

/// A single change notification from a subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEvent {
    pub kind: EventKind,
    /// Path relative to the subscribed root; `/` means the whole subtree.
    pub path: String,
    pub data: Value,
}

impl RemoteEvent {
    pub fn put(path: impl Into<String>, data: Value) -> Self {
        Self {
            kind: EventKind::Put,
            path: path.into(),
            data,
        }
    }

    pub fn patch(path: impl Into<String>, data: Value) -> Self {
        Self {
            kind: EventKind::Patch,
            path: path.into(),
            data,
        }
    }

    /// Path segments, without empty components.
    pub fn segments(&self) -> Vec<&str> {
        self.path.split('/').filter(|s| !s.is_empty()).collect()
    }

    /// Whether this event replaces the entire subscribed subtree.
    pub fn is_root(&self) -> bool {
        self.kind == EventKind::Put && self.segments().is_empty()
    }

    /// Apply this event to a cached copy of the subscribed subtree.
    pub fn apply_to(&self, target: &mut Value) {
        match self.kind {
            EventKind::Put => write_at(target, &self.segments(), self.data.clone()),
            EventKind::Patch => {
                let Value::Object(children) = &self.data else {
                    write_at(target, &self.segments(), self.data.clone());
                    return;
                };
                for (key, value) in children {
                    let full = join(&self.path, key);
                    let segments: Vec<&str> = full.split('/').collect();
                    write_at(target, &segments, value.clone());
                }
            }
        }
    }
}

/// Write `value` at `segments` below `target`, creating intermediate
/// objects. `null` removes the key, matching store semantics.
fn write_at(target: &mut Value, segments: &[&str], value: Value) {
    let Some((last, parents)) = segments.split_last() else {
        *target = value;
        return;
    };

    let mut node = target;
    for segment in parents {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        let Value::Object(map) = node else { return };
        node = map
            .entry((*segment).to_owned())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    if !node.is_object() {
        if value.is_null() {
            return;
        }
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        if value.is_null() {
            map.remove(*last);
        } else {
            map.insert((*last).to_owned(), value);
        }
    }
}

// ── Subscription ─────────────────────────────────────────────────────

/// Handle to a live event stream.
///
/// Events arrive in order on a bounded channel. Closing (or dropping) the
/// handle cancels the background reader.
#[derive(Debug)]
pub struct Subscription {
    path: String,
    events: mpsc::Receiver<Result<RemoteEvent, Error>>,
    cancel: CancellationToken,
}

impl Subscription {
    /// Build a subscription from a receiver fed by a transport task that
    /// watches `cancel`.
    pub fn new(
        path: impl Into<String>,
        events: mpsc::Receiver<Result<RemoteEvent, Error>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            path: path.into(),
            events,
            cancel,
        }
    }

    /// The subscribed path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Wait for the next event. `None` once the transport has shut down.
    pub async fn next(&mut self) -> Option<Result<RemoteEvent, Error>> {
        if self.cancel.is_cancelled() {
            return None;
        }
        self.events.recv().await
    }

    /// Cancel the stream. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ── Tests ────────────────────────────────────────────────────────────
