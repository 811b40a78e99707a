// ── Telemetry relay ──
//
// Parses `SENSORS:<v1>,...,<vN>` lines from the device, averages them,
// and publishes average and per-sensor readings in one batched update of
// the remote `status` subtree. Nothing is queued: while the remote link
// is down, readings are dropped and only fresh ones matter afterwards.

use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};
use wearlink_api::RemoteLink;

use crate::model::paths;
use crate::state::RemoteState;

const PREFIX: &str = "SENSORS:";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TelemetryError {
    #[error("not a telemetry line")]
    NotTelemetry,

    #[error("expected {expected} readings, got {got}")]
    FieldCount { expected: usize, got: usize },

    #[error("reading '{value}' is not an integer")]
    InvalidReading { value: String },
}

/// Parse a `SENSORS:` line carrying exactly `expected` integer readings.
pub fn parse_sensors_line(line: &str, expected: usize) -> Result<Vec<i32>, TelemetryError> {
    let body = line
        .trim()
        .strip_prefix(PREFIX)
        .ok_or(TelemetryError::NotTelemetry)?;

    let readings = body
        .split(',')
        .map(|field| {
            let field = field.trim();
            field.parse::<i32>().map_err(|_| TelemetryError::InvalidReading {
                value: field.into(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    if readings.len() != expected {
        return Err(TelemetryError::FieldCount {
            expected,
            got: readings.len(),
        });
    }
    Ok(readings)
}

/// Integer floor of the mean. `None` for no readings.
pub fn floor_average(readings: &[i32]) -> Option<i32> {
    let count = i64::try_from(readings.len()).ok().filter(|n| *n > 0)?;
    let sum: i64 = readings.iter().map(|r| i64::from(*r)).sum();
    i32::try_from(sum.div_euclid(count)).ok()
}

/// Batched `status` update: `current_temp` plus `sensors/<id>/temp` per reading.
pub fn status_update(readings: &[i32], sensor_ids: &[String]) -> Map<String, Value> {
    let mut fields = Map::new();
    if let Some(avg) = floor_average(readings) {
        fields.insert("current_temp".into(), Value::from(avg));
    }
    for (id, reading) in sensor_ids.iter().zip(readings) {
        fields.insert(format!("sensors/{id}/temp"), Value::from(*reading));
    }
    fields
}

/// What happened to one device line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    Published,
    /// Valid telemetry, but the remote link is down.
    Dropped,
    /// Not telemetry; ignored.
    Ignored,
    /// Malformed telemetry; discarded.
    Rejected(TelemetryError),
    /// The remote update failed.
    Failed,
}

/// Forwards device telemetry to the remote `status` subtree.
pub struct TelemetryRelay {
    remote: Arc<dyn RemoteLink>,
    remote_state: watch::Receiver<RemoteState>,
    sensor_ids: Vec<String>,
}

impl TelemetryRelay {
    pub fn new(
        remote: Arc<dyn RemoteLink>,
        remote_state: watch::Receiver<RemoteState>,
        sensor_ids: Vec<String>,
    ) -> Self {
        Self {
            remote,
            remote_state,
            sensor_ids,
        }
    }

    pub async fn handle_line(&self, line: &str) -> RelayOutcome {
        let readings = match parse_sensors_line(line, self.sensor_ids.len()) {
            Ok(readings) => readings,
            Err(TelemetryError::NotTelemetry) => {
                debug!(line, "device output");
                return RelayOutcome::Ignored;
            }
            Err(e) => {
                warn!(error = %e, line, "discarding malformed telemetry");
                return RelayOutcome::Rejected(e);
            }
        };

        if !self.remote_state.borrow().is_online() {
            debug!("remote offline, dropping telemetry");
            return RelayOutcome::Dropped;
        }

        let fields = status_update(&readings, &self.sensor_ids);
        match self.remote.update(paths::STATUS, fields).await {
            Ok(()) => RelayOutcome::Published,
            Err(e) => {
                warn!(error = %e, "telemetry update failed");
                RelayOutcome::Failed
            }
        }
    }
}
