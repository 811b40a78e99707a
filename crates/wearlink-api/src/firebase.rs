// Realtime-database client over the REST + event-stream protocol.
//
// Every path is resolved below a device namespace (`devices/<id>`), so
// callers only ever address their own document. Writes use
// `print=silent` to skip echoing the stored value back. Streaming reads
// run in a spawned task that feeds a bounded channel until the
// subscription is closed or the server ends the stream.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::remote::{self, RemoteEvent, RemoteLink, Subscription};
use crate::sse::{self, SseDecoder};

const USER_AGENT: &str = concat!("wearlink/", env!("CARGO_PKG_VERSION"));

/// Buffered events per subscription before the reader task waits.
const EVENT_CHANNEL_CAPACITY: usize = 64;

// ── FirebaseConfig ───────────────────────────────────────────────────

/// Connection parameters for [`FirebaseClient`].
#[derive(Debug, Clone)]
pub struct FirebaseConfig {
    /// Database root, e.g. `https://project-default-rtdb.firebaseio.com`.
    pub database_url: Url,
    /// Device namespace every path is scoped under, e.g. `devices/wearable_01`.
    pub namespace: String,
    /// Database secret or ID token, sent as the `auth` query parameter.
    pub auth: Option<SecretString>,
    /// Per-request timeout. Streams only use it for the initial connect.
    pub timeout: Duration,
}

impl FirebaseConfig {
    pub fn new(database_url: Url, namespace: impl Into<String>) -> Self {
        Self {
            database_url,
            namespace: namespace.into(),
            auth: None,
            timeout: Duration::from_secs(10),
        }
    }

    #[must_use]
    pub fn with_auth(mut self, auth: SecretString) -> Self {
        self.auth = Some(auth);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

// ── FirebaseClient ───────────────────────────────────────────────────

/// [`RemoteLink`] backed by the realtime database REST API.
#[derive(Debug)]
pub struct FirebaseClient {
    http: reqwest::Client,
    stream_http: reqwest::Client,
    config: FirebaseConfig,
}

impl FirebaseClient {
    pub fn new(config: FirebaseConfig) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(USER_AGENT)
            .build()?;

        // No overall timeout: streams stay open indefinitely.
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        let stream_http = reqwest::Client::builder()
            .connect_timeout(config.timeout)
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            stream_http,
            config,
        })
    }

    /// The device namespace this client is scoped to.
    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    // ── URL builders ─────────────────────────────────────────────────

    /// Build `{database_url}/{namespace}/{path}.json?auth=...&extra...`.
    fn url(&self, path: &str, extra: &[(&str, &str)]) -> Result<Url, Error> {
        let full = remote::join(&self.config.namespace, path);
        let base = self.config.database_url.as_str().trim_end_matches('/');
        let mut url = Url::parse(&format!("{base}/{full}.json"))?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(ref auth) = self.config.auth {
                query.append_pair("auth", auth.expose_secret());
            }
            for (key, value) in extra {
                query.append_pair(key, value);
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }
        Ok(url)
    }

    fn transport_error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::Timeout {
                timeout_secs: self.config.timeout.as_secs(),
            }
        } else {
            Error::Transport(e)
        }
    }

    async fn write(&self, method: reqwest::Method, path: &str, body: &Value) -> Result<(), Error> {
        debug!(%method, path, "remote write");
        let url = self.url(path, &[("print", "silent")])?;
        let resp = self
            .http
            .request(method, url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        check_status(resp).await?;
        Ok(())
    }
}

#[async_trait]
impl RemoteLink for FirebaseClient {
    async fn connect(&self) -> Result<(), Error> {
        let url = self.url("", &[("shallow", "true")])?;
        debug!(namespace = %self.config.namespace, "probing remote store");
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        check_status(resp).await?;
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Option<Value>, Error> {
        debug!(path, "remote read");
        let url = self.url(path, &[])?;
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let resp = check_status(resp).await?;
        let body = resp.text().await.map_err(|e| self.transport_error(e))?;

        match serde_json::from_str::<Value>(&body) {
            Ok(Value::Null) => Ok(None),
            Ok(value) => Ok(Some(value)),
            Err(e) => Err(Error::Deserialization {
                message: e.to_string(),
                body,
            }),
        }
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), Error> {
        self.write(reqwest::Method::PUT, path, &value).await
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<(), Error> {
        if fields.is_empty() {
            return Ok(());
        }
        self.write(reqwest::Method::PATCH, path, &Value::Object(fields))
            .await
    }

    async fn subscribe(&self, path: &str) -> Result<Subscription, Error> {
        debug!(path, "opening event stream");
        let url = self.url(path, &[])?;
        let resp = self
            .stream_http
            .get(url)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let resp = check_status(resp).await?;

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let task_path = path.to_owned();
        tokio::spawn(async move {
            stream_loop(resp, tx, task_cancel, task_path).await;
        });

        Ok(Subscription::new(path, rx, cancel))
    }
}

// ── Response handling ────────────────────────────────────────────────

/// Map non-success statuses onto [`Error`], pulling the store's
/// `{"error": "..."}` message out of the body when present.
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, Error> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_owned))
        .unwrap_or(body);

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        Err(Error::PermissionDenied { message })
    } else {
        Err(Error::Remote {
            status: status.as_u16(),
            message,
        })
    }
}

// ── Stream reader ────────────────────────────────────────────────────

/// Pump an open event-stream response into the subscription channel.
///
/// Ends on cancellation, when the receiver goes away, or after forwarding
/// a terminal error.
async fn stream_loop(
    resp: reqwest::Response,
    tx: mpsc::Sender<Result<RemoteEvent, Error>>,
    cancel: CancellationToken,
    path: String,
) {
    let mut body = resp.bytes_stream();
    let mut decoder = SseDecoder::new();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tx.closed() => break,
            chunk = body.next() => match chunk {
                Some(Ok(bytes)) => {
                    for frame in decoder.push(&bytes) {
                        let Some(item) = sse::interpret(&frame) else { continue };
                        let terminal = matches!(
                            item,
                            Err(Error::StreamClosed { .. } | Error::PermissionDenied { .. })
                        );
                        if tx.send(item).await.is_err() || terminal {
                            debug!(path, "event stream closed by server");
                            return;
                        }
                    }
                }
                Some(Err(e)) => {
                    let _ = tx.send(Err(Error::Transport(e))).await;
                    break;
                }
                None => {
                    let _ = tx
                        .send(Err(Error::StreamClosed {
                            reason: "server ended the stream".into(),
                        }))
                        .await;
                    break;
                }
            }
        }
    }

    debug!(path, "event stream finished");
}
