// ── Domain model ──
//
// Canonical types shared by the store, the reconciler and both workers.

pub mod control;
pub mod device;
pub mod remote;

pub use control::{ControlState, DEFAULT_TARGET_TEMP, GroupSetting, Mode};
pub use device::{DEFAULT_PRESET_ID, DeviceConfig, Preset, SensorPlacement};
pub use remote::{ConnectionStatus, RemoteDeviceDocument, paths};
