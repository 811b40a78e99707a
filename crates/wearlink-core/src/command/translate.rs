// ── Control state → device commands ──
//
// Group projection: one `CMD` per layout group, always in layout order,
// regardless of which field changed. Per-sensor projection: a change to
// `sensors/<id>/mode` or `sensors/<id>/target_temp` becomes exactly one
// `MODE` or `TEMP` line for that sensor.

use serde_json::Value;
use thiserror::Error;
use wearlink_api::RemoteEvent;

use super::{CommandBatch, DeviceCommand};
use crate::config::DeviceLayout;
use crate::model::control::temp_from_value;
use crate::model::{ControlState, Mode};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TranslateError {
    #[error("sensor id '{id}' has no numeric index")]
    InvalidSensorId { id: String },

    #[error("unknown sensor field '{field}'")]
    UnknownField { field: String },

    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },
}

/// Full group projection of `state`.
pub fn group_commands(state: &ControlState, layout: &DeviceLayout) -> CommandBatch {
    layout
        .groups
        .iter()
        .map(|group| DeviceCommand::SetGroup {
            channel: group.channel.clone(),
            mode: state.global_mode,
            target_temp: state.target_temp(&group.id),
        })
        .collect()
}

/// Incremental projection of a per-sensor change event.
///
/// `None` when the event does not address a single sensor; the caller
/// falls back to the group projection.
pub fn sensor_commands(event: &RemoteEvent) -> Option<Result<CommandBatch, TranslateError>> {
    match event.segments().as_slice() {
        ["sensors", id, field] => Some(
            sensor_index(id)
                .and_then(|index| field_command(index, field, &event.data))
                .map(|cmd| cmd.into_iter().collect()),
        ),
        ["sensors", id] => Some(sensor_index(id).and_then(|index| {
            let mut batch = CommandBatch::new();
            for field in ["mode", "target_temp", "targetTemp"] {
                if let Some(value) = event.data.get(field) {
                    batch.extend(field_command(index, field, value)?);
                }
            }
            Ok(batch)
        })),
        _ => None,
    }
}

fn sensor_index(id: &str) -> Result<u32, TranslateError> {
    DeviceLayout::sensor_index(id).ok_or_else(|| TranslateError::InvalidSensorId { id: id.into() })
}

/// Command for one field. `None` when the field was deleted.
fn field_command(
    index: u32,
    field: &str,
    value: &Value,
) -> Result<Option<DeviceCommand>, TranslateError> {
    if value.is_null() {
        return Ok(None);
    }
    match field {
        "mode" => {
            let mode = value.as_str().map_or(Mode::Off, Mode::parse_lenient);
            Ok(Some(DeviceCommand::SetSensorMode { index, mode }))
        }
        "target_temp" | "targetTemp" => {
            let target_temp =
                temp_from_value(value).ok_or_else(|| TranslateError::InvalidValue {
                    field: field.into(),
                    value: value.to_string(),
                })?;
            Ok(Some(DeviceCommand::SetSensorTemp { index, target_temp }))
        }
        other => Err(TranslateError::UnknownField {
            field: other.into(),
        }),
    }
}
