//! Reconciliation and liveness engine between `wearlink-api` and the binary.
//!
//! This crate owns the domain model and both long-running workers of a
//! wearable temperature-control bridge:
//!
//! - **[`Bridge`]**: orchestrator. [`start()`](Bridge::start) spawns the
//!   remote supervisor and the device worker; [`shutdown()`](Bridge::shutdown)
//!   runs the ordered, idempotent teardown and returns a [`ShutdownReport`].
//!
//! - **[`ConnectionSupervisor`]**: remote link lifecycle
//!   (`Disconnected → Connecting → Synced → Listening`) with fixed backoff,
//!   first-contact upload, reconciliation, heartbeat and snapshots.
//!
//! - **[`DeviceWorker`]**: serial link lifecycle. Re-applies the cached
//!   control state on every connect, writes command batches with a minimum
//!   spacing, and forwards telemetry through the [`TelemetryRelay`].
//!
//! - **[`ConfigStore`]** / **[`Session`]**: the persisted [`DeviceConfig`]
//!   with atomic writes and quarantine of unreadable files.
//!
//! - **Translation** ([`command::translate`]): control state to device
//!   commands, either the full group projection or incremental per-sensor
//!   commands.

pub mod bridge;
pub mod command;
pub mod config;
pub mod device;
pub mod error;
pub mod model;
pub mod provision;
pub mod reconcile;
pub mod session;
pub mod state;
pub mod store;
pub mod supervisor;
pub mod telemetry;

// ── Primary re-exports ──────────────────────────────────────────────
pub use bridge::{Bridge, ShutdownReport};
pub use command::{CommandBatch, DeviceCommand};
pub use config::{BridgeConfig, DeviceLayout, GroupSpec};
pub use device::{DeviceExit, DeviceWorker};
pub use error::CoreError;
pub use model::{ControlState, DeviceConfig, Mode, Preset, SensorPlacement};
pub use provision::{ProvisionRequest, provision_local, upload_initial};
pub use reconcile::{Reconciliation, reconcile};
pub use session::Session;
pub use state::{RemoteState, SerialState};
pub use store::{ConfigStore, StoreError};
pub use supervisor::{ConnectionSupervisor, RemoteExit};
pub use telemetry::{RelayOutcome, TelemetryRelay};
