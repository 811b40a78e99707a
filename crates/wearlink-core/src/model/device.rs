// ── Device configuration document ──

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::control::{ControlState, Mode};
use crate::config::DeviceLayout;

/// Where a sensor sits on the garment, in normalized body coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorPlacement {
    pub name: String,
    #[serde(rename = "posX", default)]
    pub pos_x: f64,
    #[serde(rename = "posY", default)]
    pub pos_y: f64,
}

/// A named control-state template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preset {
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub control: ControlState,
}

/// The locally persisted device document.
///
/// Single writer: this process. `sensors_config` is physical layout and
/// never reconciled; `presets`, `default_preset` and `last_control_state`
/// follow the remote document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub device_id: String,
    #[serde(default)]
    pub device_password: String,
    #[serde(default)]
    pub device_name: String,
    #[serde(default)]
    pub sensors_config: IndexMap<String, SensorPlacement>,
    #[serde(default)]
    pub presets: BTreeMap<String, Preset>,
    #[serde(default)]
    pub default_preset: String,
    /// Offline cache of the desired state.
    #[serde(default)]
    pub last_control_state: ControlState,
}

pub const DEFAULT_PRESET_ID: &str = "preset_daily";

/// Characters the database rejects in keys; the device id is a key.
const FORBIDDEN_KEY_CHARS: [char; 6] = ['/', '.', '#', '$', '[', ']'];

impl DeviceConfig {
    /// First-run document: five placements, a daily cooling preset, and
    /// the same state as the initial control state.
    pub fn new_default(
        device_id: impl Into<String>,
        device_password: impl Into<String>,
        device_name: impl Into<String>,
        layout: &DeviceLayout,
    ) -> Self {
        let placements = [
            ("Abdomen right", 0.24, 0.55),
            ("Abdomen left", 0.35, 0.55),
            ("Back left", 0.65, 0.45),
            ("Back right", 0.77, 0.45),
            ("Lower back", 0.71, 0.6),
        ];
        let sensors_config = (1..)
            .zip(placements)
            .map(|(idx, (name, pos_x, pos_y))| {
                (
                    DeviceLayout::sensor_id(idx),
                    SensorPlacement {
                        name: name.into(),
                        pos_x,
                        pos_y,
                    },
                )
            })
            .collect();

        let daily = layout
            .groups
            .iter()
            .fold(ControlState::new(Mode::Cooling), |state, group| {
                state.with_group(group.id.clone(), 24)
            });

        let mut presets = BTreeMap::new();
        presets.insert(
            DEFAULT_PRESET_ID.to_owned(),
            Preset {
                name: "Daily".into(),
                control: daily.clone(),
            },
        );

        Self {
            device_id: device_id.into(),
            device_password: device_password.into(),
            device_name: device_name.into(),
            sensors_config,
            presets,
            default_preset: DEFAULT_PRESET_ID.into(),
            last_control_state: daily,
        }
    }

    /// Sensor ids in configured order.
    pub fn sensor_ids(&self) -> Vec<String> {
        self.sensors_config.keys().cloned().collect()
    }

    /// Structural checks every loaded document must pass.
    pub fn validate(&self) -> Result<(), String> {
        if self.device_id.trim().is_empty() {
            return Err("device_id is empty".into());
        }
        if self.device_id.contains(FORBIDDEN_KEY_CHARS) {
            return Err(format!(
                "device_id '{}' must not contain any of / . # $ [ ]",
                self.device_id
            ));
        }
        if self.sensors_config.is_empty() {
            return Err("sensors_config is empty".into());
        }
        Ok(())
    }

    /// Stricter checks applied when provisioning a new device.
    pub fn validate_for_provisioning(&self) -> Result<(), String> {
        self.validate()?;
        if self.device_password.is_empty() {
            return Err("device_password is empty".into());
        }
        if self.presets.is_empty() {
            return Err("presets is empty".into());
        }
        if !self.presets.contains_key(&self.default_preset) {
            return Err(format!(
                "default_preset '{}' is not a known preset",
                self.default_preset
            ));
        }
        Ok(())
    }
}
