// ── Bridge orchestration ──
//
// Starts the remote supervisor and the device worker as independent
// tasks, treats an unexpected exit of either as fatal, and runs the
// ordered shutdown exactly once: cancel, join (bounded), close the
// serial port, close subscriptions, publish `offline`.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::sync::{Mutex, OnceCell, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use wearlink_api::{RemoteLink, SerialLink};

use crate::config::BridgeConfig;
use crate::device::{DeviceExit, DeviceWorker};
use crate::error::CoreError;
use crate::model::remote::{connection_fields, now_millis};
use crate::model::{ConnectionStatus, paths};
use crate::session::Session;
use crate::state::{RemoteState, SerialState};
use crate::supervisor::{ConnectionSupervisor, RemoteExit};
use crate::telemetry::TelemetryRelay;

const COMMAND_CHANNEL_SIZE: usize = 64;

/// What the shutdown sequence achieved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Both workers returned before the timeout.
    pub workers_stopped: bool,
    /// The serial port held at shutdown was closed.
    pub serial_closed: bool,
    /// Number of live subscriptions released.
    pub subscriptions_closed: usize,
    /// The final `offline` status reached the remote store.
    pub offline_published: bool,
}

// ── Bridge ───────────────────────────────────────────────────────────

/// Runs one device's bridge between the remote store and the serial port.
///
/// Cheaply cloneable; all clones share the same workers and shutdown.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

struct BridgeInner {
    config: BridgeConfig,
    session: Arc<Session>,
    remote: Arc<dyn RemoteLink>,
    serial: Arc<dyn SerialLink>,
    remote_state: watch::Sender<RemoteState>,
    serial_state: watch::Sender<SerialState>,
    liveness: Liveness,
    started: AtomicBool,
    workers: Mutex<Option<Workers>>,
    report: OnceCell<ShutdownReport>,
}

struct Workers {
    remote: JoinHandle<RemoteExit>,
    device: JoinHandle<DeviceExit>,
}

impl Bridge {
    pub fn new(
        config: BridgeConfig,
        session: Arc<Session>,
        remote: Arc<dyn RemoteLink>,
        serial: Arc<dyn SerialLink>,
    ) -> Self {
        let (remote_state, _) = watch::channel(RemoteState::Disconnected);
        let (serial_state, _) = watch::channel(SerialState::Disconnected);

        Self {
            inner: Arc::new(BridgeInner {
                config,
                session,
                remote,
                serial,
                remote_state,
                serial_state,
                liveness: Liveness::default(),
                started: AtomicBool::new(false),
                workers: Mutex::new(None),
                report: OnceCell::new(),
            }),
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.inner.session
    }

    pub fn remote_state(&self) -> watch::Receiver<RemoteState> {
        self.inner.remote_state.subscribe()
    }

    pub fn serial_state(&self) -> watch::Receiver<SerialState> {
        self.inner.serial_state.subscribe()
    }

    /// The shared termination flag. Cancelling it stops both workers;
    /// [`shutdown`](Self::shutdown) still has to run to release resources.
    pub fn cancel_token(&self) -> CancellationToken {
        self.inner.liveness.cancel.clone()
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Spawn both workers. A bridge can be started once.
    pub async fn start(&self) -> Result<(), CoreError> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(CoreError::AlreadyStarted);
        }

        let inner = &self.inner;
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let cancel = inner.liveness.cancel.clone();

        let relay = TelemetryRelay::new(
            Arc::clone(&inner.remote),
            inner.remote_state.subscribe(),
            inner.session.sensor_ids().await,
        );
        let supervisor = ConnectionSupervisor::new(
            Arc::clone(&inner.remote),
            Arc::clone(&inner.session),
            command_tx,
            inner.remote_state.clone(),
            inner.config.clone(),
            cancel.clone(),
        );
        let device = DeviceWorker::new(
            Arc::clone(&inner.serial),
            Arc::clone(&inner.session),
            command_rx,
            relay,
            inner.serial_state.clone(),
            inner.config.clone(),
            cancel,
        );

        let workers = Workers {
            remote: tokio::spawn(guarded("remote", inner.liveness.clone(), supervisor.run())),
            device: tokio::spawn(guarded("device", inner.liveness.clone(), device.run())),
        };
        *inner.workers.lock().await = Some(workers);
        info!(device_id = %inner.session.device_id().await, "bridge started");
        Ok(())
    }

    /// Start, run until `shutdown` resolves, the termination flag is set,
    /// or a worker dies, then shut down.
    ///
    /// A worker exiting on its own is reported as
    /// [`CoreError::WorkerExited`] after the shutdown sequence has run.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<ShutdownReport, CoreError>
    where
        F: Future<Output = ()> + Send,
    {
        self.start().await?;

        let liveness = &self.inner.liveness;
        let failed = tokio::select! {
            biased;
            () = liveness.failed.cancelled() => Some(liveness.culprit()),
            () = liveness.cancel.cancelled() => None,
            () = shutdown => {
                info!("shutdown requested");
                None
            }
        };

        let report = self.shutdown().await;
        match failed {
            Some(worker) => Err(CoreError::WorkerExited { worker }),
            None => Ok(report),
        }
    }

    /// Ordered, idempotent shutdown. Later calls return the first report
    /// without side effects.
    pub async fn shutdown(&self) -> ShutdownReport {
        *self
            .inner
            .report
            .get_or_init(|| self.inner.shutdown_once())
            .await
    }
}

// ── Shutdown ─────────────────────────────────────────────────────────

impl BridgeInner {
    async fn shutdown_once(&self) -> ShutdownReport {
        info!("shutting down bridge");
        let mut report = ShutdownReport::default();

        // 1. Termination flag.
        self.liveness.cancel.cancel();

        // 2. Bounded join.
        let workers = self.workers.lock().await.take();
        let (remote_exit, device_exit) = match workers {
            Some(workers) => {
                let deadline = Instant::now() + self.config.shutdown_timeout;
                let remote = join_worker("remote", workers.remote, deadline).await;
                let device = join_worker("device", workers.device, deadline).await;
                report.workers_stopped = remote.is_some() && device.is_some();
                (remote, device)
            }
            None => {
                report.workers_stopped = true;
                (None, None)
            }
        };

        // 3. Serial port.
        if let Some(mut handle) = device_exit.and_then(|exit| exit.handle) {
            match handle.close().await {
                Ok(()) => {
                    report.serial_closed = true;
                    debug!("serial port closed");
                }
                Err(e) => warn!(error = %e, "failed to close serial port"),
            }
        }
        self.serial_state.send_replace(SerialState::Disconnected);

        // 4. Subscriptions.
        if let Some(exit) = remote_exit {
            for sub in &exit.subscriptions {
                sub.close();
            }
            report.subscriptions_closed = exit.subscriptions.len();
        }

        // 5. Final status, only if the link was up.
        let reachable = self.remote_state.borrow().is_online();
        if reachable {
            let offline = connection_fields(ConnectionStatus::Offline, now_millis());
            let publish = self.remote.update(paths::CONNECTION, offline);
            match tokio::time::timeout(self.config.shutdown_timeout, publish).await {
                Ok(Ok(())) => report.offline_published = true,
                Ok(Err(e)) => warn!(error = %e, "failed to publish offline status"),
                Err(_) => warn!("timed out publishing offline status"),
            }
        }
        self.remote_state.send_replace(RemoteState::Disconnected);

        info!(?report, "bridge stopped");
        report
    }
}

/// Wait for a worker until `deadline`, aborting it if it is still running.
async fn join_worker<T: Send>(
    worker: &'static str,
    mut handle: JoinHandle<T>,
    deadline: Instant,
) -> Option<T> {
    match tokio::time::timeout_at(deadline, &mut handle).await {
        Ok(Ok(exit)) => Some(exit),
        Ok(Err(e)) => {
            warn!(worker, error = %e, "worker task failed");
            None
        }
        Err(_) => {
            warn!(worker, "worker did not stop in time, aborting");
            handle.abort();
            None
        }
    }
}

// ── Worker liveness ──────────────────────────────────────────────────

/// Shared termination flag plus the fatal-exit signal.
#[derive(Clone, Default)]
struct Liveness {
    cancel: CancellationToken,
    failed: CancellationToken,
    culprit: Arc<OnceLock<&'static str>>,
}

impl Liveness {
    fn culprit(&self) -> &'static str {
        self.culprit.get().copied().unwrap_or("unknown")
    }
}

/// Flags a worker that stops (returns or panics) before termination was
/// requested, and requests termination.
struct ExitGuard {
    worker: &'static str,
    liveness: Liveness,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        if self.liveness.cancel.is_cancelled() {
            return;
        }
        error!(worker = self.worker, "worker exited unexpectedly");
        let _ = self.liveness.culprit.set(self.worker);
        self.liveness.failed.cancel();
        self.liveness.cancel.cancel();
    }
}

async fn guarded<T: Send>(
    worker: &'static str,
    liveness: Liveness,
    task: impl Future<Output = T> + Send,
) -> T {
    let _guard = ExitGuard { worker, liveness };
    task.await
}
