// ── Local/remote reconciliation ──
//
// Field-level precedence, computed as a pure diff so callers decide when
// to persist and re-apply. Remote wins for `control`, `presets` and a
// non-empty `default_preset`; `sensors_config` is never reconciled.

use std::collections::BTreeMap;

use crate::model::{ControlState, DeviceConfig, Preset, RemoteDeviceDocument};

/// Changes the remote document imposes on the local one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciliation {
    pub control: Option<ControlState>,
    pub presets: Option<BTreeMap<String, Preset>>,
    pub default_preset: Option<String>,
}

impl Reconciliation {
    pub fn is_empty(&self) -> bool {
        self.control.is_none() && self.presets.is_none() && self.default_preset.is_none()
    }

    /// Whether the effective control state changed, so the device must be
    /// driven again.
    pub fn control_changed(&self) -> bool {
        self.control.is_some()
    }

    /// Names of the fields that changed, for logging.
    pub fn changed_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.control.is_some() {
            fields.push("control");
        }
        if self.presets.is_some() {
            fields.push("presets");
        }
        if self.default_preset.is_some() {
            fields.push("default_preset");
        }
        fields
    }

    /// Write the changes into `config`.
    pub fn apply(&self, config: &mut DeviceConfig) {
        if let Some(ref control) = self.control {
            config.last_control_state = control.clone();
        }
        if let Some(ref presets) = self.presets {
            config.presets = presets.clone();
        }
        if let Some(ref default_preset) = self.default_preset {
            config.default_preset = default_preset.clone();
        }
    }
}

/// Diff `remote` against `local`.
pub fn reconcile(local: &DeviceConfig, remote: &RemoteDeviceDocument) -> Reconciliation {
    Reconciliation {
        control: remote
            .control
            .as_ref()
            .filter(|c| **c != local.last_control_state)
            .cloned(),
        presets: remote
            .presets
            .as_ref()
            .filter(|p| **p != local.presets)
            .cloned(),
        default_preset: remote
            .default_preset
            .as_ref()
            .filter(|d| !d.is_empty() && **d != local.default_preset)
            .cloned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceLayout;
    use crate::model::{Mode, SensorPlacement};
    use pretty_assertions::assert_eq;

    fn local() -> DeviceConfig {
        DeviceConfig::new_default("w1", "pw", "", &DeviceLayout::default())
    }

    #[test]
    fn identical_documents_reconcile_to_nothing() {
        let local = local();
        let remote = RemoteDeviceDocument {
            control: Some(local.last_control_state.clone()),
            presets: Some(local.presets.clone()),
            default_preset: Some(local.default_preset.clone()),
        };
        assert!(reconcile(&local, &remote).is_empty());
    }

    #[test]
    fn remote_control_wins() {
        let mut local = local();
        let remote_control = ControlState::new(Mode::Heating)
            .with_group("group_1", 30)
            .with_group("group_2", 31);
        let remote = RemoteDeviceDocument {
            control: Some(remote_control.clone()),
            ..RemoteDeviceDocument::default()
        };

        let outcome = reconcile(&local, &remote);
        assert!(outcome.control_changed());
        assert_eq!(outcome.changed_fields(), ["control"]);

        outcome.apply(&mut local);
        assert_eq!(local.last_control_state, remote_control);
        assert!(reconcile(&local, &remote).is_empty());
    }

    #[test]
    fn remote_presets_replace_local_entirely() {
        let mut local = local();
        let mut presets = BTreeMap::new();
        presets.insert(
            "preset_night".to_owned(),
            Preset {
                name: "Night".into(),
                control: ControlState::new(Mode::Off),
            },
        );
        let remote = RemoteDeviceDocument {
            presets: Some(presets.clone()),
            ..RemoteDeviceDocument::default()
        };

        let outcome = reconcile(&local, &remote);
        assert!(!outcome.control_changed());
        outcome.apply(&mut local);
        assert_eq!(local.presets, presets);
    }

    #[test]
    fn empty_default_preset_is_ignored() {
        let local = local();
        let remote = RemoteDeviceDocument {
            default_preset: Some(String::new()),
            ..RemoteDeviceDocument::default()
        };
        assert!(reconcile(&local, &remote).is_empty());

        let remote = RemoteDeviceDocument {
            default_preset: Some("preset_night".into()),
            ..RemoteDeviceDocument::default()
        };
        assert_eq!(
            reconcile(&local, &remote).default_preset.as_deref(),
            Some("preset_night")
        );
    }

    #[test]
    fn sensor_layout_is_never_touched() {
        let mut local = local();
        local.sensors_config.insert(
            "sensor_06".into(),
            SensorPlacement {
                name: "Neck".into(),
                pos_x: 0.5,
                pos_y: 0.1,
            },
        );
        let before = local.sensors_config.clone();
        let remote = RemoteDeviceDocument {
            control: Some(ControlState::new(Mode::Cooling)),
            ..RemoteDeviceDocument::default()
        };
        reconcile(&local, &remote).apply(&mut local);
        assert_eq!(local.sensors_config, before);
    }
}
