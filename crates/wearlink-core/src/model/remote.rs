// ── Remote device document ──
//
// Paths and payloads below `devices/<device_id>`. `connection` and
// `status` are written only by this process; `control`, `presets` and
// `default_preset` may be changed by other clients at any time.

use std::collections::BTreeMap;

use serde_json::{Map, Value, json};
use tracing::warn;

use super::control::{ControlState, normalize_document};
use super::device::{DeviceConfig, Preset};
use crate::config::DeviceLayout;

/// Relative paths inside the device namespace.
pub mod paths {
    pub const ROOT: &str = "";
    pub const CONTROL: &str = "control";
    pub const PRESETS: &str = "presets";
    pub const DEFAULT_PRESET: &str = "default_preset";
    pub const CONNECTION: &str = "connection";
    pub const STATUS: &str = "status";
    pub const STATUS_SENSORS: &str = "status/sensors";
    pub const LOGS: &str = "logs";
}

/// Value of `connection/status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionStatus {
    Online,
    Offline,
}

/// Current time as Unix epoch milliseconds, the `last_seen` unit.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Fields for an `update` of the `connection` subtree.
pub fn connection_fields(status: ConnectionStatus, last_seen: i64) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("status".into(), Value::String(status.to_string()));
    fields.insert("last_seen".into(), Value::from(last_seen));
    fields
}

/// The document uploaded on first contact.
pub fn initial_document(config: &DeviceConfig) -> Value {
    let sensors: Map<String, Value> = config
        .sensors_config
        .iter()
        .map(|(id, placement)| {
            (
                id.clone(),
                json!({
                    "name": placement.name,
                    "posX": placement.pos_x,
                    "posY": placement.pos_y,
                    "temp": 0,
                }),
            )
        })
        .collect();

    let mut doc = json!({
        "password": config.device_password,
        "default_preset": config.default_preset,
        "connection": {"status": ConnectionStatus::Offline.to_string(), "last_seen": 0},
        "control": config.last_control_state,
        "status": {"current_temp": 0, "sensors": sensors},
        "presets": config.presets,
    });
    if !config.device_name.is_empty() {
        doc["name"] = Value::String(config.device_name.clone());
    }
    doc
}

/// The externally mutable part of the remote document, decoded.
///
/// `None` means the remote has no value there and expresses no opinion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteDeviceDocument {
    pub control: Option<ControlState>,
    pub presets: Option<BTreeMap<String, Preset>>,
    pub default_preset: Option<String>,
}

impl RemoteDeviceDocument {
    /// Decode the device root as fetched from the store.
    pub fn from_value(value: &Value, layout: &DeviceLayout) -> Self {
        Self {
            control: value
                .get("control")
                .filter(|v| !v.is_null())
                .map(|v| ControlState::from_document(v, layout)),
            presets: value.get("presets").and_then(|v| decode_presets(v, layout)),
            default_preset: value
                .get("default_preset")
                .and_then(Value::as_str)
                .map(str::to_owned),
        }
    }
}

/// Decode a `presets` subtree, migrating per-sensor templates.
pub fn decode_presets(value: &Value, layout: &DeviceLayout) -> Option<BTreeMap<String, Preset>> {
    let Value::Object(entries) = value else {
        return None;
    };
    let presets = entries
        .iter()
        .filter_map(|(id, raw)| {
            let mut raw = raw.clone();
            normalize_document(&mut raw, layout);
            match serde_json::from_value::<Preset>(raw) {
                Ok(preset) => Some((id.clone(), preset)),
                Err(e) => {
                    warn!(preset = %id, error = %e, "skipping unreadable preset");
                    None
                }
            }
        })
        .collect();
    Some(presets)
}
