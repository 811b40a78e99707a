// ── Control state domain types ──
//
// Canonical shape is group based: one global mode plus a target
// temperature per group. Per-sensor documents (`{sensors: {id: {mode,
// target_temp}}}`) are accepted wherever a control document is read and
// migrated through the device layout.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::config::DeviceLayout;

/// Target temperature used whenever a document leaves one out.
pub const DEFAULT_TARGET_TEMP: i32 = 24;

/// Operating mode of a heating/cooling element.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Mode {
    Cooling,
    Heating,
    #[default]
    Off,
}

impl Mode {
    /// Parse a remote mode string. Anything unrecognized reads as `Off`.
    pub fn parse_lenient(raw: &str) -> Self {
        raw.trim().parse().unwrap_or(Self::Off)
    }

    /// Upper-case token used on the device wire.
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::Cooling => "COOLING",
            Self::Heating => "HEATING",
            Self::Off => "OFF",
        }
    }
}

impl<'de> Deserialize<'de> for Mode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(value.as_str().map_or(Self::Off, Self::parse_lenient))
    }
}

/// Per-group settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSetting {
    #[serde(
        default = "default_temp",
        alias = "targetTemp",
        deserialize_with = "lenient_temp"
    )]
    pub target_temp: i32,
}

impl Default for GroupSetting {
    fn default() -> Self {
        Self {
            target_temp: DEFAULT_TARGET_TEMP,
        }
    }
}

/// Desired operating parameters for the device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlState {
    #[serde(default, alias = "globalMode")]
    pub global_mode: Mode,
    #[serde(default)]
    pub groups: BTreeMap<String, GroupSetting>,
    /// Preset the state was last loaded from, as written by other clients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset_applied: Option<String>,
}

impl ControlState {
    pub fn new(global_mode: Mode) -> Self {
        Self {
            global_mode,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_group(mut self, id: impl Into<String>, target_temp: i32) -> Self {
        self.groups.insert(id.into(), GroupSetting { target_temp });
        self
    }

    /// Target temperature for `group`, falling back to the default.
    pub fn target_temp(&self, group: &str) -> i32 {
        self.groups
            .get(group)
            .map_or(DEFAULT_TARGET_TEMP, |g| g.target_temp)
    }

    /// Read a control document of either shape.
    ///
    /// `null` and undecodable documents yield the safe default (`off`).
    pub fn from_document(value: &Value, layout: &DeviceLayout) -> Self {
        if value.is_null() {
            return Self::default();
        }
        if is_sensor_document(value) {
            return match serde_json::from_value::<SensorControlDocument>(value.clone()) {
                Ok(doc) => doc.migrate(layout),
                Err(e) => {
                    warn!(error = %e, "unreadable per-sensor control document, using defaults");
                    Self::default()
                }
            };
        }
        match serde_json::from_value(value.clone()) {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "unreadable control document, using defaults");
                Self::default()
            }
        }
    }
}

// ── Per-sensor documents ─────────────────────────────────────────────

/// Whether `value` is a per-sensor control document.
pub fn is_sensor_document(value: &Value) -> bool {
    value.as_object().is_some_and(|map| {
        map.contains_key("sensors")
            && !map.contains_key("groups")
            && !map.contains_key("global_mode")
    })
}

/// Rewrite a per-sensor control document in place as its group-based
/// equivalent. Returns `true` if anything changed.
pub fn normalize_document(value: &mut Value, layout: &DeviceLayout) -> bool {
    if !is_sensor_document(value) {
        return false;
    }
    let migrated = ControlState::from_document(value, layout);
    match serde_json::to_value(&migrated) {
        Ok(v) => {
            *value = v;
            true
        }
        Err(_) => false,
    }
}

#[derive(Debug, Default, Deserialize)]
struct SensorControlDocument {
    #[serde(default)]
    sensors: BTreeMap<String, SensorSetting>,
}

#[derive(Debug, Deserialize)]
struct SensorSetting {
    #[serde(default)]
    mode: Mode,
    #[serde(
        default = "default_temp",
        alias = "targetTemp",
        deserialize_with = "lenient_temp"
    )]
    target_temp: i32,
}

impl SensorControlDocument {
    /// Each group takes the temperature of its first listed sensor present
    /// in the document; the global mode is the first active sensor mode.
    fn migrate(&self, layout: &DeviceLayout) -> ControlState {
        let global_mode = self
            .sensors
            .values()
            .map(|s| s.mode)
            .find(|m| *m != Mode::Off)
            .unwrap_or(Mode::Off);

        let groups = layout
            .groups
            .iter()
            .map(|group| {
                let target_temp = group
                    .sensors
                    .iter()
                    .find_map(|idx| {
                        self.sensors
                            .get(&DeviceLayout::sensor_id(*idx))
                            .map(|s| s.target_temp)
                    })
                    .unwrap_or(DEFAULT_TARGET_TEMP);
                (group.id.clone(), GroupSetting { target_temp })
            })
            .collect();

        ControlState {
            global_mode,
            groups,
            preset_applied: None,
        }
    }
}

// ── Lenient temperature decoding ─────────────────────────────────────

fn default_temp() -> i32 {
    DEFAULT_TARGET_TEMP
}

fn lenient_temp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i32, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(temp_from_value(&value).unwrap_or(DEFAULT_TARGET_TEMP))
}

/// Interpret an integer, float, or numeric string as a whole temperature.
#[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
pub fn temp_from_value(value: &Value) -> Option<i32> {
    let float = match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return i32::try_from(i).ok();
            }
            n.as_f64()?
        }
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    float
        .is_finite()
        .then_some(float.round())
        .filter(|f| (f64::from(i32::MIN)..=f64::from(i32::MAX)).contains(f))
        .map(|f| f as i32)
}
