// Test doubles for the remote store and the serial device.
#![allow(dead_code, clippy::unwrap_used)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use wearlink_api::remote::join;
use wearlink_api::{Error, RemoteEvent, RemoteLink, SerialHandle, SerialLink, Subscription};

// ── MemoryRemote ────────────────────────────────────────────────────

/// In-memory device document with subscriptions and last-will support.
#[derive(Clone, Default)]
pub struct MemoryRemote {
    inner: Arc<Mutex<RemoteInner>>,
}

#[derive(Default)]
struct RemoteInner {
    doc: Value,
    unreachable: bool,
    fail_updates: bool,
    subscribers: Vec<Subscriber>,
    last_will: Vec<(String, Value)>,
    writes: Vec<(String, String)>,
    reads: Vec<String>,
    subscribes: usize,
}

struct Subscriber {
    path: String,
    tx: mpsc::Sender<Result<RemoteEvent, Error>>,
    cancel: CancellationToken,
}

fn unavailable() -> Error {
    Error::Remote {
        status: 503,
        message: "unreachable".into(),
    }
}

fn pointer(path: &str) -> String {
    let path = join("", path);
    if path.is_empty() {
        path
    } else {
        format!("/{path}")
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(doc: Value) -> Self {
        let remote = Self::default();
        remote.inner.lock().unwrap().doc = doc;
        remote
    }

    pub fn doc(&self) -> Value {
        self.inner.lock().unwrap().doc.clone()
    }

    pub fn value_at(&self, path: &str) -> Value {
        let inner = self.inner.lock().unwrap();
        inner.doc.pointer(&pointer(path)).cloned().unwrap_or(Value::Null)
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.inner.lock().unwrap().unreachable = !reachable;
    }

    pub fn fail_updates(&self, fail: bool) {
        self.inner.lock().unwrap().fail_updates = fail;
    }

    /// `(operation, path)` of every write that reached the store.
    pub fn writes(&self) -> Vec<(String, String)> {
        self.inner.lock().unwrap().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.inner.lock().unwrap().writes.clear();
    }

    /// Paths of every successful `get`.
    pub fn reads(&self) -> Vec<String> {
        self.inner.lock().unwrap().reads.clone()
    }

    /// Number of subscriptions ever opened.
    pub fn subscribe_count(&self) -> usize {
        self.inner.lock().unwrap().subscribes
    }

    pub fn last_will(&self) -> Vec<(String, Value)> {
        self.inner.lock().unwrap().last_will.clone()
    }

    pub fn live_subscriptions(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner
            .subscribers
            .iter()
            .filter(|s| !s.cancel.is_cancelled())
            .count()
    }

    /// Another client writes `value` at `path`.
    pub fn external_set(&self, path: &str, value: Value) {
        let mut inner = self.inner.lock().unwrap();
        inner.write(path, value);
    }

    /// Another client patches `fields` into `path`.
    pub fn external_update(&self, path: &str, fields: Map<String, Value>) {
        let mut inner = self.inner.lock().unwrap();
        inner.patch(path, fields);
    }

    /// Deliver an undecodable frame to every subscriber of `path`.
    pub fn send_malformed(&self, path: &str) {
        let path = join("", path);
        let inner = self.inner.lock().unwrap();
        for sub in inner.subscribers.iter().filter(|s| s.path == path) {
            let _ = sub.tx.try_send(Err(Error::Deserialization {
                message: "expected value at line 1 column 1".into(),
                body: "{\"path\":\"/\",\"data\":".into(),
            }));
        }
    }

    /// The connection drops without notice: last-will writes land and
    /// every stream ends.
    pub fn simulate_crash(&self) {
        let mut inner = self.inner.lock().unwrap();
        let wills = std::mem::take(&mut inner.last_will);
        for (path, value) in wills {
            RemoteEvent::put(path, value).apply_to(&mut inner.doc);
        }
        inner.unreachable = true;
        for sub in inner.subscribers.drain(..) {
            let _ = sub.tx.try_send(Err(Error::StreamClosed {
                reason: "connection reset".into(),
            }));
        }
    }
}

impl RemoteInner {
    fn check(&self) -> Result<(), Error> {
        if self.unreachable {
            Err(unavailable())
        } else {
            Ok(())
        }
    }

    fn write(&mut self, path: &str, value: Value) {
        let path = join("", path);
        RemoteEvent::put(path.clone(), value.clone()).apply_to(&mut self.doc);
        self.notify(&path, &value);
    }

    fn patch(&mut self, path: &str, fields: Map<String, Value>) {
        let path = join("", path);
        RemoteEvent::patch(path.clone(), Value::Object(fields.clone())).apply_to(&mut self.doc);
        self.subscribers.retain(|s| !s.cancel.is_cancelled());
        for sub in &self.subscribers {
            if sub.path == path {
                let _ = sub
                    .tx
                    .try_send(Ok(RemoteEvent::patch("/", Value::Object(fields.clone()))));
            }
        }
        for (key, value) in fields {
            let full = join(&path, &key);
            for sub in &self.subscribers {
                if sub.path != path {
                    notify_one(sub, &full, &value, &self.doc);
                }
            }
        }
    }

    fn notify(&mut self, path: &str, value: &Value) {
        self.subscribers.retain(|s| !s.cancel.is_cancelled());
        for sub in &self.subscribers {
            notify_one(sub, path, value, &self.doc);
        }
    }
}

/// Deliver a write at `path` to `sub` if it overlaps the subscribed subtree.
fn notify_one(sub: &Subscriber, path: &str, value: &Value, doc: &Value) {
    let event = if let Some(rest) = relative(path, &sub.path) {
        RemoteEvent::put(format!("/{rest}"), value.clone())
    } else if relative(&sub.path, path).is_some() {
        let subtree = doc.pointer(&pointer(&sub.path)).cloned().unwrap_or(Value::Null);
        RemoteEvent::put("/", subtree)
    } else {
        return;
    };
    let _ = sub.tx.try_send(Ok(event));
}

/// `path` relative to `base`, if `path` is at or below `base`.
fn relative<'a>(path: &'a str, base: &str) -> Option<&'a str> {
    if base.is_empty() {
        return Some(path);
    }
    let rest = path.strip_prefix(base)?;
    if rest.is_empty() {
        Some(rest)
    } else {
        rest.strip_prefix('/')
    }
}

#[async_trait]
impl RemoteLink for MemoryRemote {
    async fn connect(&self) -> Result<(), Error> {
        self.inner.lock().unwrap().check()
    }

    async fn get(&self, path: &str) -> Result<Option<Value>, Error> {
        let mut inner = self.inner.lock().unwrap();
        inner.check()?;
        inner.reads.push(join("", path));
        Ok(inner
            .doc
            .pointer(&pointer(path))
            .filter(|v| !v.is_null())
            .cloned())
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        inner.check()?;
        inner.writes.push(("set".into(), join("", path)));
        inner.write(path, value);
        Ok(())
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        inner.check()?;
        if inner.fail_updates {
            return Err(unavailable());
        }
        inner.writes.push(("update".into(), join("", path)));
        inner.patch(path, fields);
        Ok(())
    }

    async fn subscribe(&self, path: &str) -> Result<Subscription, Error> {
        let mut inner = self.inner.lock().unwrap();
        inner.check()?;
        let path = join("", path);
        let (tx, rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        inner.subscribes += 1;
        let current = inner.doc.pointer(&pointer(&path)).cloned().unwrap_or(Value::Null);
        tx.try_send(Ok(RemoteEvent::put("/", current))).unwrap();
        inner.subscribers.push(Subscriber {
            path: path.clone(),
            tx,
            cancel: cancel.clone(),
        });
        Ok(Subscription::new(path, rx, cancel))
    }

    async fn on_disconnect_set(&self, path: &str, value: Value) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        inner.check()?;
        let path = join("", path);
        inner.last_will.retain(|(p, _)| *p != path);
        inner.last_will.push((path, value));
        Ok(())
    }
}

// ── ScriptedSerial ──────────────────────────────────────────────────

enum Input {
    Line(String),
    Disconnect,
}

/// Serial device double: records writes with their time and replays
/// scripted input on the current handle.
#[derive(Clone, Default)]
pub struct ScriptedSerial {
    inner: Arc<Mutex<SerialInner>>,
}

#[derive(Default)]
struct SerialInner {
    opens: usize,
    failing_opens: usize,
    closes: usize,
    writes: Vec<(Instant, String)>,
    input: Option<mpsc::UnboundedSender<Input>>,
}

impl ScriptedSerial {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` open attempts.
    pub fn fail_opens(&self, n: usize) {
        self.inner.lock().unwrap().failing_opens = n;
    }

    pub fn opens(&self) -> usize {
        self.inner.lock().unwrap().opens
    }

    pub fn closes(&self) -> usize {
        self.inner.lock().unwrap().closes
    }

    pub fn writes(&self) -> Vec<(Instant, String)> {
        self.inner.lock().unwrap().writes.clone()
    }

    pub fn lines(&self) -> Vec<String> {
        self.writes().into_iter().map(|(_, line)| line).collect()
    }

    pub fn clear_writes(&self) {
        self.inner.lock().unwrap().writes.clear();
    }

    /// The device prints `line` on the current port.
    pub fn send_line(&self, line: &str) {
        if let Some(tx) = &self.inner.lock().unwrap().input {
            let _ = tx.send(Input::Line(line.into()));
        }
    }

    /// The device is unplugged from the current port.
    pub fn unplug(&self) {
        if let Some(tx) = self.inner.lock().unwrap().input.take() {
            let _ = tx.send(Input::Disconnect);
        }
    }
}

#[async_trait]
impl SerialLink for ScriptedSerial {
    async fn open(&self) -> Result<Box<dyn SerialHandle>, Error> {
        let mut inner = self.inner.lock().unwrap();
        if inner.failing_opens > 0 {
            inner.failing_opens -= 1;
            return Err(Error::SerialOpen {
                port: "scripted".into(),
                reason: "no such device".into(),
            });
        }
        inner.opens += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        inner.input = Some(tx);
        Ok(Box::new(ScriptedHandle {
            device: Arc::clone(&self.inner),
            input: rx,
            closed: false,
        }))
    }

    fn describe(&self) -> String {
        "scripted".into()
    }
}

struct ScriptedHandle {
    device: Arc<Mutex<SerialInner>>,
    input: mpsc::UnboundedReceiver<Input>,
    closed: bool,
}

#[async_trait]
impl SerialHandle for ScriptedHandle {
    async fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, Error> {
        if self.closed {
            return Err(Error::SerialClosed);
        }
        match tokio::time::timeout(timeout, self.input.recv()).await {
            Ok(Some(Input::Line(line))) => Ok(Some(line)),
            Ok(Some(Input::Disconnect) | None) => Err(Error::SerialClosed),
            Err(_) => Ok(None),
        }
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), Error> {
        if self.closed {
            return Err(Error::SerialClosed);
        }
        let line = String::from_utf8_lossy(bytes).trim_end().to_owned();
        self.device.lock().unwrap().writes.push((Instant::now(), line));
        Ok(())
    }

    async fn close(&mut self) -> Result<(), Error> {
        if !self.closed {
            self.closed = true;
            self.device.lock().unwrap().closes += 1;
        }
        Ok(())
    }
}
