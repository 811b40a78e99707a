// ── Runtime bridge configuration ──
//
// These types describe *how* the bridge runs: timers, backoff, and the
// mapping from control groups to device channels. They never touch disk.
// The binary builds a `BridgeConfig` from its settings and hands it in.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One control group: a remote group id, the device channel it drives,
/// and the sensor indices it covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSpec {
    /// Remote group key, e.g. `group_1`.
    pub id: String,
    /// Channel letter in `CMD:<channel>:...` commands.
    pub channel: String,
    /// 1-based sensor indices belonging to this group.
    #[serde(default)]
    pub sensors: Vec<u32>,
}

/// Ordered group layout. Command order follows the order of `groups`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceLayout {
    pub groups: Vec<GroupSpec>,
}

impl Default for DeviceLayout {
    fn default() -> Self {
        Self {
            groups: vec![
                GroupSpec {
                    id: "group_1".into(),
                    channel: "A".into(),
                    sensors: vec![1, 2],
                },
                GroupSpec {
                    id: "group_2".into(),
                    channel: "B".into(),
                    sensors: vec![3, 4, 5],
                },
            ],
        }
    }
}

impl DeviceLayout {
    pub fn group(&self, id: &str) -> Option<&GroupSpec> {
        self.groups.iter().find(|g| g.id == id)
    }

    /// Canonical sensor key for a 1-based index: `3` → `sensor_03`.
    pub fn sensor_id(index: u32) -> String {
        format!("sensor_{index:02}")
    }

    /// Inverse of [`sensor_id`](Self::sensor_id). `None` for a missing
    /// prefix or a non-numeric suffix.
    pub fn sensor_index(id: &str) -> Option<u32> {
        id.strip_prefix("sensor_")?.parse().ok()
    }
}

/// Timers and policies for a running bridge.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub layout: DeviceLayout,
    /// Upper bound on a single serial line wait.
    pub read_timeout: Duration,
    /// Minimum gap between two device writes.
    pub command_spacing: Duration,
    pub serial_backoff: Duration,
    pub remote_backoff: Duration,
    pub heartbeat_interval: Duration,
    /// Temperature log interval. Zero disables snapshots.
    pub snapshot_interval: Duration,
    /// How long shutdown waits for workers before aborting them.
    pub shutdown_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            layout: DeviceLayout::default(),
            read_timeout: Duration::from_secs(1),
            command_spacing: Duration::from_millis(50),
            serial_backoff: Duration::from_secs(5),
            remote_backoff: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(5),
            snapshot_interval: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(2),
        }
    }
}
