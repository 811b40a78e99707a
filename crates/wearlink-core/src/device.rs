// ── Device worker ──
//
// Owns the serial link: open with backoff, restore the cached control
// state on every (re)connect, then interleave command batches from the
// supervisor with telemetry lines from the device. Writes are spaced by
// the configured gap and never interrupted.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use wearlink_api::{SerialHandle, SerialLink};

use crate::command::translate::group_commands;
use crate::command::{CommandBatch, DeviceCommand};
use crate::config::BridgeConfig;
use crate::session::Session;
use crate::state::SerialState;
use crate::telemetry::TelemetryRelay;

/// What the device worker hands back when it stops.
#[derive(Default)]
pub struct DeviceExit {
    /// The open port at shutdown, not yet closed.
    pub handle: Option<Box<dyn SerialHandle>>,
}

/// What woke the serve loop.
enum Wake {
    Cancelled,
    Commands(Option<CommandBatch>),
    Line(Result<Option<String>, wearlink_api::Error>),
}

pub struct DeviceWorker {
    serial: Arc<dyn SerialLink>,
    session: Arc<Session>,
    commands: mpsc::Receiver<CommandBatch>,
    relay: TelemetryRelay,
    state: watch::Sender<SerialState>,
    config: BridgeConfig,
    cancel: CancellationToken,
    last_write: Option<Instant>,
}

impl DeviceWorker {
    pub fn new(
        serial: Arc<dyn SerialLink>,
        session: Arc<Session>,
        commands: mpsc::Receiver<CommandBatch>,
        relay: TelemetryRelay,
        state: watch::Sender<SerialState>,
        config: BridgeConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            serial,
            session,
            commands,
            relay,
            state,
            config,
            cancel,
            last_write: None,
        }
    }

    /// Run until cancelled. Transport errors close the port and retry after
    /// the backoff, indefinitely.
    pub async fn run(mut self) -> DeviceExit {
        let port = self.serial.describe();
        let mut failures: u32 = 0;

        loop {
            self.state.send_replace(SerialState::Connecting);

            let opened = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                result = self.serial.open() => result,
            };

            match opened {
                Ok(mut handle) => {
                    info!(port = %port, "serial link connected");
                    failures = 0;
                    self.state.send_replace(SerialState::Connected);

                    match self.serve(handle.as_mut()).await {
                        Ok(()) => {
                            return DeviceExit {
                                handle: Some(handle),
                            };
                        }
                        Err(e) => {
                            warn!(port = %port, error = %e, "serial link lost");
                            if let Err(e) = handle.close().await {
                                debug!(error = %e, "closing failed port");
                            }
                        }
                    }
                }
                Err(e) => {
                    if failures == 0 {
                        warn!(
                            port = %port,
                            error = %e,
                            backoff_secs = self.config.serial_backoff.as_secs(),
                            "serial device unavailable, retrying"
                        );
                    } else {
                        debug!(error = %e, attempt = failures, "serial open attempt failed");
                    }
                    failures = failures.saturating_add(1);
                }
            }

            self.state.send_replace(SerialState::Disconnected);

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(self.config.serial_backoff) => {}
            }
        }

        self.state.send_replace(SerialState::Disconnected);
        debug!("device worker exiting");
        DeviceExit::default()
    }

    /// Drive one open port. `Ok` on cancellation, `Err` on a transport failure.
    async fn serve(&mut self, handle: &mut dyn SerialHandle) -> Result<(), wearlink_api::Error> {
        // Batches queued while the port was down are superseded by the
        // full state restored below.
        let mut stale = 0_usize;
        while self.commands.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            debug!(batches = stale, "discarding commands queued while disconnected");
        }

        let control = self.session.last_control().await;
        let restore = group_commands(&control, &self.config.layout);
        info!(mode = %control.global_mode, "re-applying last control state");
        self.write_batch(handle, &restore).await?;

        let mut commands_open = true;
        loop {
            let wake = tokio::select! {
                biased;
                () = self.cancel.cancelled() => Wake::Cancelled,
                batch = self.commands.recv(), if commands_open => Wake::Commands(batch),
                line = handle.read_line(self.config.read_timeout) => Wake::Line(line),
            };

            match wake {
                Wake::Cancelled => return Ok(()),
                Wake::Commands(Some(batch)) => self.write_batch(handle, &batch).await?,
                Wake::Commands(None) => commands_open = false,
                Wake::Line(line) => {
                    if let Some(line) = line? {
                        self.relay.handle_line(&line).await;
                    }
                }
            }
        }
    }

    /// Write `batch` in order, keeping at least `command_spacing` between
    /// consecutive writes.
    async fn write_batch(
        &mut self,
        handle: &mut dyn SerialHandle,
        batch: &[DeviceCommand],
    ) -> Result<(), wearlink_api::Error> {
        for command in batch {
            if let Some(last) = self.last_write {
                tokio::time::sleep_until(last + self.config.command_spacing).await;
            }
            handle.write(&command.encode()).await?;
            self.last_write = Some(Instant::now());
            debug!(%command, "command sent");
        }
        Ok(())
    }
}
