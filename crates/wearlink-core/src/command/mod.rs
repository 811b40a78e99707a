// ── Device commands ──
//
// Typed commands for the device's newline-terminated text protocol.
// Batches are produced by `translate` and written strictly in order by
// the device worker.

pub mod translate;

use std::fmt;

use crate::model::Mode;

/// One line on the device wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCommand {
    /// `CMD:<channel>:<MODE>:<temp>`
    SetGroup {
        channel: String,
        mode: Mode,
        target_temp: i32,
    },
    /// `MODE:<idx>:<MODE>`
    SetSensorMode { index: u32, mode: Mode },
    /// `TEMP:<idx>:<temp>`
    SetSensorTemp { index: u32, target_temp: i32 },
}

impl DeviceCommand {
    /// Wire bytes, newline included.
    pub fn encode(&self) -> Vec<u8> {
        format!("{self}\n").into_bytes()
    }
}

impl fmt::Display for DeviceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SetGroup {
                channel,
                mode,
                target_temp,
            } => write!(f, "CMD:{channel}:{}:{target_temp}", mode.wire_name()),
            Self::SetSensorMode { index, mode } => write!(f, "MODE:{index}:{}", mode.wire_name()),
            Self::SetSensorTemp { index, target_temp } => write!(f, "TEMP:{index}:{target_temp}"),
        }
    }
}

/// An ordered group of commands written back to back.
pub type CommandBatch = Vec<DeviceCommand>;
