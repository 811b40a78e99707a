// ── Remote connection supervisor ──
//
// Owns the remote link lifecycle: connect, reconcile, subscribe, then
// heartbeat until something fails, and start over after a fixed backoff.
// Control changes from other clients are persisted and forwarded to the
// device worker as command batches.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use wearlink_api::{RemoteEvent, RemoteLink, Subscription};

use crate::command::CommandBatch;
use crate::command::translate::{group_commands, sensor_commands};
use crate::config::BridgeConfig;
use crate::error::CoreError;
use crate::model::remote::{connection_fields, decode_presets, initial_document, now_millis};
use crate::model::{ConnectionStatus, ControlState, RemoteDeviceDocument, paths};
use crate::session::Session;
use crate::state::RemoteState;

/// What the supervisor hands back when it stops.
#[derive(Debug, Default)]
pub struct RemoteExit {
    /// Subscriptions that were live at shutdown, still open.
    pub subscriptions: Vec<Subscription>,
}

/// A subscription plus the cached subtree its events are applied to.
struct Feed {
    subscription: Subscription,
    doc: Value,
}

impl Feed {
    fn new(subscription: Subscription) -> Self {
        Self {
            subscription,
            doc: Value::Null,
        }
    }
}

/// The three live feeds of a listening session.
struct Feeds {
    control: Feed,
    presets: Feed,
    default_preset: Feed,
}

impl Feeds {
    fn into_subscriptions(self) -> Vec<Subscription> {
        vec![
            self.control.subscription,
            self.presets.subscription,
            self.default_preset.subscription,
        ]
    }
}

pub struct ConnectionSupervisor {
    remote: Arc<dyn RemoteLink>,
    session: Arc<Session>,
    commands: mpsc::Sender<CommandBatch>,
    state: watch::Sender<RemoteState>,
    config: BridgeConfig,
    cancel: CancellationToken,
}

impl ConnectionSupervisor {
    pub fn new(
        remote: Arc<dyn RemoteLink>,
        session: Arc<Session>,
        commands: mpsc::Sender<CommandBatch>,
        state: watch::Sender<RemoteState>,
        config: BridgeConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            remote,
            session,
            commands,
            state,
            config,
            cancel,
        }
    }

    /// Run until cancelled. Never fails: every remote error leads back to
    /// `Disconnected` and another attempt after the backoff.
    pub async fn run(self) -> RemoteExit {
        let mut failures: u32 = 0;

        loop {
            self.state.send_replace(RemoteState::Connecting);

            let established = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                result = self.establish() => result,
            };

            match established {
                Ok(mut feeds) => {
                    if failures > 0 {
                        info!(attempts = failures, "remote link restored");
                    }
                    failures = 0;
                    match self.listen(&mut feeds).await {
                        Ok(()) => {
                            return RemoteExit {
                                subscriptions: feeds.into_subscriptions(),
                            };
                        }
                        Err(e) => {
                            warn!(error = %e, "remote link lost");
                            for sub in feeds.into_subscriptions() {
                                sub.close();
                            }
                        }
                    }
                }
                Err(e) => {
                    if failures == 0 {
                        warn!(
                            error = %e,
                            backoff_secs = self.config.remote_backoff.as_secs(),
                            "remote link unavailable, retrying"
                        );
                    } else {
                        debug!(error = %e, attempt = failures, "remote connect attempt failed");
                    }
                    failures = failures.saturating_add(1);
                }
            }

            self.state.send_replace(RemoteState::Disconnected);

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(self.config.remote_backoff) => {}
            }
        }

        self.state.send_replace(RemoteState::Disconnected);
        debug!("remote supervisor exiting");
        RemoteExit::default()
    }

    // ── Connecting → Synced → Listening ──────────────────────────────

    async fn establish(&self) -> Result<Feeds, CoreError> {
        self.remote.connect().await?;
        self.register_last_will().await;

        self.sync().await?;
        self.remote
            .update(
                paths::CONNECTION,
                connection_fields(ConnectionStatus::Online, now_millis()),
            )
            .await?;
        self.state.send_replace(RemoteState::Synced);

        let feeds = Feeds {
            control: Feed::new(self.remote.subscribe(paths::CONTROL).await?),
            presets: Feed::new(self.remote.subscribe(paths::PRESETS).await?),
            default_preset: Feed::new(self.remote.subscribe(paths::DEFAULT_PRESET).await?),
        };
        self.state.send_replace(RemoteState::Listening);
        info!("remote link listening");
        Ok(feeds)
    }

    async fn register_last_will(&self) {
        let path = wearlink_api::remote::join(paths::CONNECTION, "status");
        let offline = Value::String(ConnectionStatus::Offline.to_string());
        match self.remote.on_disconnect_set(&path, offline).await {
            Ok(()) => debug!("offline last-will registered"),
            Err(wearlink_api::Error::UnsupportedOperation(_)) => {
                debug!("remote transport has no last-will support");
            }
            Err(e) => warn!(error = %e, "failed to register offline last-will"),
        }
    }

    /// Fetch the reconciled subtrees and merge them, or upload our document
    /// on first contact. `status` and `logs` are never read here.
    async fn sync(&self) -> Result<(), CoreError> {
        let mut fetched = Map::new();
        for key in [paths::CONTROL, paths::PRESETS, paths::DEFAULT_PRESET] {
            if let Some(value) = self.remote.get(key).await? {
                fetched.insert(key.to_owned(), value);
            }
        }

        if fetched.is_empty() {
            let config = self.session.snapshot().await;
            info!(device_id = %config.device_id, "first contact, uploading local document");
            self.remote
                .set(paths::ROOT, initial_document(&config))
                .await?;
            return Ok(());
        }

        let layout = self.session.layout();
        let remote = RemoteDeviceDocument::from_value(&Value::Object(fetched), layout);
        if let Some(control) = self.reconcile(&remote).await {
            self.dispatch(group_commands(&control, layout));
        }
        Ok(())
    }

    /// Reconcile and return the new control state if it changed.
    async fn reconcile(&self, remote: &RemoteDeviceDocument) -> Option<ControlState> {
        let outcome = match self.session.reconcile(remote).await {
            Ok(outcome) => outcome,
            Err((outcome, e)) => {
                warn!(error = %e, "failed to persist reconciled config");
                outcome
            }
        };
        outcome.control
    }

    // ── Listening ────────────────────────────────────────────────────

    /// Serve events and heartbeats. `Ok` on cancellation, `Err` when the
    /// link is lost.
    async fn listen(&self, feeds: &mut Feeds) -> Result<(), CoreError> {
        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat.tick().await; // consume the immediate first tick

        let snapshots = !self.config.snapshot_interval.is_zero();
        let mut snapshot = tokio::time::interval(if snapshots {
            self.config.snapshot_interval
        } else {
            Duration::from_secs(3600)
        });
        snapshot.set_missed_tick_behavior(MissedTickBehavior::Delay);
        snapshot.tick().await;

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Ok(()),
                _ = heartbeat.tick() => self.heartbeat().await?,
                event = feeds.control.subscription.next() => {
                    if let Some(event) = received(event, paths::CONTROL)? {
                        self.on_control_event(&mut feeds.control.doc, &event).await;
                    }
                }
                event = feeds.presets.subscription.next() => {
                    if let Some(event) = received(event, paths::PRESETS)? {
                        event.apply_to(&mut feeds.presets.doc);
                        let remote = RemoteDeviceDocument {
                            presets: decode_presets(&feeds.presets.doc, self.session.layout()),
                            ..RemoteDeviceDocument::default()
                        };
                        self.reconcile(&remote).await;
                    }
                }
                event = feeds.default_preset.subscription.next() => {
                    if let Some(event) = received(event, paths::DEFAULT_PRESET)? {
                        event.apply_to(&mut feeds.default_preset.doc);
                        let remote = RemoteDeviceDocument {
                            default_preset: feeds.default_preset.doc.as_str().map(str::to_owned),
                            ..RemoteDeviceDocument::default()
                        };
                        self.reconcile(&remote).await;
                    }
                }
                _ = snapshot.tick(), if snapshots => self.snapshot().await,
            }
        }
    }

    async fn heartbeat(&self) -> Result<(), CoreError> {
        self.remote
            .update(
                paths::CONNECTION,
                connection_fields(ConnectionStatus::Online, now_millis()),
            )
            .await?;
        debug!("heartbeat");
        Ok(())
    }

    /// Copy current per-sensor temperatures under `logs/<date>/<time>`.
    /// Best effort.
    async fn snapshot(&self) {
        let sensors = match self.remote.get(paths::STATUS_SENSORS).await {
            Ok(Some(sensors)) => sensors,
            Ok(None) => return,
            Err(e) => {
                debug!(error = %e, "snapshot read failed");
                return;
            }
        };
        let temps: Map<String, Value> = sensors
            .as_object()
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|(id, sensor)| Some((id.clone(), sensor.get("temp")?.clone())))
                    .collect()
            })
            .unwrap_or_default();
        if temps.is_empty() {
            return;
        }

        let now = chrono::Local::now();
        let path = format!(
            "{}/{}/{}",
            paths::LOGS,
            now.format("%Y%m%d"),
            now.format("%H%M%S")
        );
        match self.remote.set(&path, Value::Object(temps)).await {
            Ok(()) => debug!(path, "temperature snapshot stored"),
            Err(e) => debug!(error = %e, "snapshot write failed"),
        }
    }

    /// Apply a `control` event: persist the resulting state, then hand the
    /// device either the incremental sensor commands or the full group
    /// projection.
    async fn on_control_event(&self, doc: &mut Value, event: &RemoteEvent) {
        event.apply_to(doc);
        let layout = self.session.layout();
        let state = ControlState::from_document(doc, layout);

        if let Some(translated) = sensor_commands(event) {
            match translated {
                Ok(batch) => {
                    if let Err(e) = self.session.record_control(state).await {
                        warn!(error = %e, "failed to persist control state");
                    }
                    self.dispatch(batch);
                }
                Err(e) => warn!(error = %e, path = %event.path, "rejecting sensor control event"),
            }
            return;
        }

        let changed = match self.session.record_control(state.clone()).await {
            Ok(changed) => changed,
            Err(e) => {
                warn!(error = %e, "failed to persist control state");
                true
            }
        };
        if !changed && event.is_root() {
            debug!("control document unchanged");
            return;
        }
        info!(mode = %state.global_mode, "control state changed");
        self.dispatch(group_commands(&state, layout));
    }

    fn dispatch(&self, batch: CommandBatch) {
        if batch.is_empty() {
            return;
        }
        match self.commands.try_send(batch) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("device command queue full, dropping batch");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("device worker gone, dropping batch");
            }
        }
    }
}

/// Unwrap one subscription item. A malformed payload is skipped with
/// `Ok(None)`; any other error or a closed stream means the link is lost.
fn received(
    item: Option<Result<RemoteEvent, wearlink_api::Error>>,
    path: &str,
) -> Result<Option<RemoteEvent>, CoreError> {
    match item {
        Some(Ok(event)) => Ok(Some(event)),
        Some(Err(wearlink_api::Error::Deserialization { message, .. })) => {
            warn!(path, error = %message, "dropping malformed remote event");
            Ok(None)
        }
        Some(Err(e)) => Err(e.into()),
        None => Err(CoreError::RemoteUnavailable {
            reason: format!("{path} subscription ended"),
        }),
    }
}
