// Integration tests for `Bridge` against in-memory doubles, on paused time.
#![allow(clippy::unwrap_used)]

mod support;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio::sync::watch;

use support::{MemoryRemote, ScriptedSerial};
use wearlink_api::{SerialHandle, SerialLink};
use wearlink_core::model::remote::initial_document;
use wearlink_core::{
    Bridge, BridgeConfig, ConfigStore, ControlState, CoreError, DeviceConfig, DeviceLayout, Mode,
    RemoteState, SerialState, Session,
};

// ── Helpers ─────────────────────────────────────────────────────────

struct Harness {
    bridge: Bridge,
    remote: MemoryRemote,
    serial: ScriptedSerial,
    _dir: tempfile::TempDir,
}

fn local_config(control: ControlState) -> DeviceConfig {
    let mut config = DeviceConfig::new_default("w1", "pw", "Vest", &DeviceLayout::default());
    config.last_control_state = control;
    config
}

fn cooling(a: i32, b: i32) -> ControlState {
    ControlState::new(Mode::Cooling)
        .with_group("group_1", a)
        .with_group("group_2", b)
}

fn setup_with(remote: MemoryRemote, config: &DeviceConfig, serial: Arc<dyn SerialLink>) -> (Bridge, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = ConfigStore::new(dir.path().join("config.json"), DeviceLayout::default());
    store.save(config).unwrap();
    let session = Arc::new(Session::load(store).unwrap());
    let bridge = Bridge::new(BridgeConfig::default(), session, Arc::new(remote), serial);
    (bridge, dir)
}

/// Local and remote agree on `control`.
fn setup(control: ControlState) -> Harness {
    let config = local_config(control);
    let remote = MemoryRemote::with_document(initial_document(&config));
    harness(remote, &config)
}

fn harness(remote: MemoryRemote, config: &DeviceConfig) -> Harness {
    let serial = ScriptedSerial::new();
    let (bridge, dir) = setup_with(remote.clone(), config, Arc::new(serial.clone()));
    Harness {
        bridge,
        remote,
        serial,
        _dir: dir,
    }
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..6000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 60s");
}

async fn wait_remote(rx: &mut watch::Receiver<RemoteState>, state: RemoteState) {
    tokio::time::timeout(Duration::from_secs(60), rx.wait_for(|s| *s == state))
        .await
        .unwrap()
        .unwrap();
}

async fn wait_serial(rx: &mut watch::Receiver<SerialState>, state: SerialState) {
    tokio::time::timeout(Duration::from_secs(60), rx.wait_for(|s| *s == state))
        .await
        .unwrap()
        .unwrap();
}

/// Start and wait until both links are up.
async fn start(h: &Harness) {
    let mut remote_state = h.bridge.remote_state();
    let mut serial_state = h.bridge.serial_state();
    h.bridge.start().await.unwrap();
    wait_remote(&mut remote_state, RemoteState::Listening).await;
    wait_serial(&mut serial_state, SerialState::Connected).await;
}

fn assert_spaced(serial: &ScriptedSerial) {
    let writes = serial.writes();
    for pair in writes.windows(2) {
        let gap = pair[1].0 - pair[0].0;
        assert!(gap >= Duration::from_millis(50), "commands {gap:?} apart");
    }
}

// ── Command path ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn control_change_drives_groups_in_order() {
    let h = setup(cooling(24, 26));
    start(&h).await;

    wait_until(|| h.serial.lines().len() >= 2).await;
    assert_eq!(h.serial.lines(), ["CMD:A:COOLING:24", "CMD:B:COOLING:26"]);

    // Initial control snapshot matches the cache: nothing is re-sent.
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(h.serial.lines().len(), 2);

    h.remote
        .external_set("control/groups/group_2/target_temp", json!(22));
    wait_until(|| h.serial.lines().len() >= 4).await;
    assert_eq!(
        h.serial.lines()[2..],
        ["CMD:A:COOLING:24", "CMD:B:COOLING:22"]
    );
    assert_spaced(&h.serial);

    let stored = h.bridge.session().store().load().unwrap();
    assert_eq!(stored.last_control_state, cooling(24, 22));

    h.bridge.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn reconnect_reapplies_last_control() {
    let h = setup(cooling(24, 26));
    start(&h).await;
    wait_until(|| h.serial.lines().len() >= 2).await;

    h.serial.unplug();
    wait_until(|| h.serial.opens() == 2 && h.serial.lines().len() >= 4).await;

    let lines = h.serial.lines();
    assert_eq!(lines[..2], lines[2..]);
    assert_eq!(h.serial.closes(), 1);

    h.bridge.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn serial_open_retries_after_backoff() {
    let h = setup(cooling(24, 24));
    h.serial.fail_opens(2);
    let mut serial_state = h.bridge.serial_state();
    h.bridge.start().await.unwrap();

    let started = tokio::time::Instant::now();
    wait_serial(&mut serial_state, SerialState::Connected).await;
    assert!(started.elapsed() >= Duration::from_secs(10));
    assert_eq!(h.serial.opens(), 1);

    h.bridge.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn legacy_sensor_events_emit_incremental_commands() {
    let config = local_config(cooling(24, 24));
    let sensors: serde_json::Map<String, Value> = (1..=5)
        .map(|i| {
            (
                DeviceLayout::sensor_id(i),
                json!({"mode": "cooling", "target_temp": 24}),
            )
        })
        .collect();
    let remote = MemoryRemote::with_document(json!({"control": {"sensors": sensors}}));
    let h = harness(remote, &config);
    start(&h).await;
    wait_until(|| h.serial.lines().len() >= 2).await;

    h.remote
        .external_set("control/sensors/sensor_03/mode", json!("heating"));
    wait_until(|| h.serial.lines().len() >= 3).await;
    assert_eq!(h.serial.lines()[2], "MODE:3:HEATING");

    // Non-numeric suffix: rejected, nothing sent.
    h.remote
        .external_set("control/sensors/sensor_xx/mode", json!("cooling"));
    h.remote
        .external_set("control/sensors/sensor_01/target_temp", json!(28));
    wait_until(|| h.serial.lines().len() >= 4).await;
    assert_eq!(h.serial.lines()[3..], ["TEMP:1:28"]);

    let control = h.bridge.session().last_control().await;
    assert_eq!(control.target_temp("group_1"), 28);

    h.bridge.shutdown().await;
}

// ── Reconciliation ──────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn first_contact_uploads_local_document() {
    let config = local_config(cooling(24, 24));
    let h = harness(MemoryRemote::new(), &config);
    start(&h).await;

    let doc = h.remote.doc();
    assert_eq!(doc["password"], "pw");
    assert_eq!(doc["name"], "Vest");
    assert_eq!(doc["default_preset"], "preset_daily");
    assert_eq!(
        ControlState::from_document(&doc["control"], &DeviceLayout::default()),
        cooling(24, 24)
    );
    assert_eq!(doc["connection"]["status"], "online");
    assert_eq!(
        h.remote.writes()[..2],
        [
            ("set".to_owned(), String::new()),
            ("update".to_owned(), "connection".to_owned()),
        ]
    );

    h.bridge.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn remote_control_wins_and_drives_device() {
    let config = local_config(cooling(24, 24));
    let mut remote_doc = initial_document(&config);
    remote_doc["control"] = json!({
        "global_mode": "heating",
        "groups": {"group_1": {"target_temp": 30}, "group_2": {"target_temp": 31}},
    });
    let h = harness(MemoryRemote::with_document(remote_doc), &config);
    start(&h).await;

    wait_until(|| {
        h.serial
            .lines()
            .ends_with(&["CMD:A:HEATING:30".to_owned(), "CMD:B:HEATING:31".to_owned()])
    })
    .await;

    let expected = ControlState::new(Mode::Heating)
        .with_group("group_1", 30)
        .with_group("group_2", 31);
    assert_eq!(h.bridge.session().last_control().await, expected);
    assert_eq!(
        h.bridge.session().store().load().unwrap().last_control_state,
        expected
    );

    h.bridge.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn remote_presets_replace_local() {
    let h = setup(cooling(24, 24));
    start(&h).await;

    h.remote.external_set(
        "presets/preset_night",
        json!({"name": "Night", "global_mode": "off", "groups": {}}),
    );
    wait_until(|| {
        h.bridge
            .session()
            .store()
            .load()
            .unwrap()
            .presets
            .contains_key("preset_night")
    })
    .await;

    h.remote.external_set("default_preset", json!("preset_night"));
    wait_until(|| h.bridge.session().store().load().unwrap().default_preset == "preset_night").await;

    h.bridge.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn sync_reads_only_reconciled_subtrees() {
    let config = local_config(cooling(24, 24));
    let mut remote_doc = initial_document(&config);
    remote_doc["logs"] = json!({"20240101": {"120000": {"sensor_01": 21}}});
    let h = harness(MemoryRemote::with_document(remote_doc), &config);
    start(&h).await;
    let mut remote_state = h.bridge.remote_state();

    h.remote.simulate_crash();
    wait_remote(&mut remote_state, RemoteState::Disconnected).await;
    h.remote.set_reachable(true);
    wait_remote(&mut remote_state, RemoteState::Listening).await;

    let reads = h.remote.reads();
    assert_eq!(
        reads,
        ["control", "presets", "default_preset", "control", "presets", "default_preset"]
    );
    assert_eq!(h.remote.value_at("logs/20240101/120000/sensor_01"), 21);

    h.bridge.shutdown().await;
}

// ── Liveness ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn heartbeat_failure_demotes_state() {
    let h = setup(cooling(24, 24));
    start(&h).await;
    let mut remote_state = h.bridge.remote_state();

    h.remote.fail_updates(true);
    wait_remote(&mut remote_state, RemoteState::Disconnected).await;

    h.remote.fail_updates(false);
    wait_remote(&mut remote_state, RemoteState::Listening).await;
    assert_eq!(h.remote.value_at("connection/status"), "online");

    h.bridge.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn heartbeat_refreshes_last_seen() {
    let h = setup(cooling(24, 24));
    start(&h).await;
    h.remote.clear_writes();

    tokio::time::sleep(Duration::from_secs(11)).await;
    let heartbeats = h
        .remote
        .writes()
        .iter()
        .filter(|(op, path)| op == "update" && path == "connection")
        .count();
    assert!(heartbeats >= 2, "{heartbeats} heartbeats");

    h.bridge.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn crash_leaves_last_will_and_reconnects() {
    let h = setup(cooling(24, 24));
    start(&h).await;
    let mut remote_state = h.bridge.remote_state();
    assert_eq!(
        h.remote.last_will(),
        [("connection/status".to_owned(), json!("offline"))]
    );

    h.remote.simulate_crash();
    assert_eq!(h.remote.value_at("connection/status"), "offline");
    wait_remote(&mut remote_state, RemoteState::Disconnected).await;

    h.remote.set_reachable(true);
    wait_remote(&mut remote_state, RemoteState::Listening).await;
    assert_eq!(h.remote.value_at("connection/status"), "online");

    h.bridge.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn malformed_remote_event_is_skipped() {
    let h = setup(cooling(24, 26));
    start(&h).await;
    wait_until(|| h.serial.lines().len() >= 2).await;
    assert_eq!(h.remote.subscribe_count(), 3);

    h.remote.send_malformed("control");
    tokio::time::sleep(Duration::from_secs(1)).await;
    let remote_state = h.bridge.remote_state();
    assert_eq!(*remote_state.borrow(), RemoteState::Listening);
    assert_eq!(h.remote.subscribe_count(), 3);
    assert_eq!(h.remote.live_subscriptions(), 3);

    // The feed keeps delivering after the bad frame.
    h.remote
        .external_set("control/groups/group_1/target_temp", json!(20));
    wait_until(|| h.serial.lines().len() >= 4).await;
    assert_eq!(
        h.serial.lines()[2..],
        ["CMD:A:COOLING:20", "CMD:B:COOLING:26"]
    );

    h.bridge.shutdown().await;
}

// ── Telemetry ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn telemetry_is_averaged_and_malformed_lines_dropped() {
    let h = setup(cooling(24, 24));
    start(&h).await;

    h.serial.send_line("SENSORS:24,25,x,27,28");
    h.serial.send_line("SENSORS:24,25,26");
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.remote.value_at("status/current_temp"), 0);

    h.serial.send_line("SENSORS:20,21,22,23,25\r");
    wait_until(|| h.remote.value_at("status/current_temp") == 22).await;
    assert_eq!(h.remote.value_at("status/sensors/sensor_01/temp"), 20);
    assert_eq!(h.remote.value_at("status/sensors/sensor_05/temp"), 25);
    assert_eq!(h.remote.value_at("status/sensors/sensor_05/name"), "Lower back");

    h.bridge.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn telemetry_is_dropped_while_remote_down() {
    let config = local_config(cooling(24, 24));
    let remote = MemoryRemote::with_document(initial_document(&config));
    remote.set_reachable(false);
    let h = harness(remote, &config);
    let mut serial_state = h.bridge.serial_state();
    h.bridge.start().await.unwrap();
    wait_serial(&mut serial_state, SerialState::Connected).await;

    h.serial.send_line("SENSORS:20,21,22,23,25");
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(h.remote.writes().is_empty());
    assert_eq!(h.remote.value_at("status/current_temp"), 0);

    h.bridge.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn snapshot_logs_sensor_temperatures() {
    let h = setup(cooling(24, 24));
    start(&h).await;

    h.serial.send_line("SENSORS:20,21,22,23,25");
    wait_until(|| h.remote.value_at("status/current_temp") == 22).await;

    tokio::time::sleep(Duration::from_secs(61)).await;
    let logs: Vec<String> = h
        .remote
        .writes()
        .into_iter()
        .filter(|(op, path)| op == "set" && path.starts_with("logs/"))
        .map(|(_, path)| path)
        .collect();
    assert_eq!(logs.len(), 1, "{logs:?}");

    let entry = h.remote.value_at(&logs[0]);
    assert_eq!(entry["sensor_01"], 20);
    assert_eq!(entry["sensor_05"], 25);

    h.bridge.shutdown().await;
}

// ── Shutdown ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn shutdown_is_ordered_and_idempotent() {
    let h = setup(cooling(24, 24));
    start(&h).await;

    let report = h.bridge.shutdown().await;
    assert!(report.workers_stopped);
    assert!(report.serial_closed);
    assert_eq!(report.subscriptions_closed, 3);
    assert!(report.offline_published);

    assert_eq!(h.serial.closes(), 1);
    assert_eq!(h.remote.live_subscriptions(), 0);
    assert_eq!(h.remote.value_at("connection/status"), "offline");
    assert_eq!(
        h.remote.writes().last().unwrap(),
        &("update".to_owned(), "connection".to_owned())
    );

    let writes = h.remote.writes().len();
    assert_eq!(h.bridge.shutdown().await, report);
    assert_eq!(h.serial.closes(), 1);
    assert_eq!(h.remote.writes().len(), writes);
    assert_eq!(*h.bridge.remote_state().borrow(), RemoteState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn shutdown_skips_offline_when_unreachable() {
    let config = local_config(cooling(24, 24));
    let remote = MemoryRemote::with_document(initial_document(&config));
    remote.set_reachable(false);
    let h = harness(remote, &config);
    let mut serial_state = h.bridge.serial_state();
    h.bridge.start().await.unwrap();
    wait_serial(&mut serial_state, SerialState::Connected).await;

    let report = h.bridge.shutdown().await;
    assert!(report.workers_stopped);
    assert!(report.serial_closed);
    assert!(!report.offline_published);
    assert!(h.remote.writes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn run_until_returns_after_signal() {
    let h = setup(cooling(24, 24));
    let report = h
        .bridge
        .run_until(tokio::time::sleep(Duration::from_secs(30)))
        .await
        .unwrap();
    assert!(report.workers_stopped);
    assert_eq!(h.serial.closes(), 1);
    assert_eq!(h.remote.value_at("connection/status"), "offline");
}

#[tokio::test(start_paused = true)]
async fn start_twice_is_rejected() {
    let h = setup(cooling(24, 24));
    h.bridge.start().await.unwrap();
    assert!(matches!(
        h.bridge.start().await,
        Err(CoreError::AlreadyStarted)
    ));
    h.bridge.shutdown().await;
}

struct PanickingSerial;

#[async_trait]
impl SerialLink for PanickingSerial {
    async fn open(&self) -> Result<Box<dyn SerialHandle>, wearlink_api::Error> {
        panic!("driver bug");
    }

    fn describe(&self) -> String {
        "panicking".into()
    }
}

#[tokio::test(start_paused = true)]
async fn worker_panic_is_fatal() {
    let config = local_config(cooling(24, 24));
    let remote = MemoryRemote::with_document(initial_document(&config));
    let (bridge, _dir) = setup_with(remote, &config, Arc::new(PanickingSerial));

    let err = bridge
        .run_until(std::future::pending())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::WorkerExited { worker: "device" }));
    assert!(bridge.cancel_token().is_cancelled());
}
