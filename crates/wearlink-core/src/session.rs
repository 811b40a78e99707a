// ── Shared session state ──
//
// The in-memory DeviceConfig plus the store that persists it. Both
// workers hold an `Arc<Session>`; every mutation goes through the lock.
// Saves run on the blocking pool and are ordered by `save_lock`, taken
// before the state lock is released, so the file ends on the latest state.

use tokio::sync::Mutex;
use tracing::info;

use crate::config::DeviceLayout;
use crate::model::{ControlState, DeviceConfig, RemoteDeviceDocument};
use crate::reconcile::{Reconciliation, reconcile};
use crate::store::{ConfigStore, StoreError};

pub struct Session {
    config: Mutex<DeviceConfig>,
    save_lock: Mutex<()>,
    store: ConfigStore,
}

impl Session {
    pub fn new(config: DeviceConfig, store: ConfigStore) -> Self {
        Self {
            config: Mutex::new(config),
            save_lock: Mutex::new(()),
            store,
        }
    }

    /// Load the persisted document through `store`.
    pub fn load(store: ConfigStore) -> Result<Self, StoreError> {
        let config = store.load()?;
        Ok(Self::new(config, store))
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub fn layout(&self) -> &DeviceLayout {
        self.store.layout()
    }

    pub async fn snapshot(&self) -> DeviceConfig {
        self.config.lock().await.clone()
    }

    pub async fn device_id(&self) -> String {
        self.config.lock().await.device_id.clone()
    }

    pub async fn last_control(&self) -> ControlState {
        self.config.lock().await.last_control_state.clone()
    }

    pub async fn sensor_ids(&self) -> Vec<String> {
        self.config.lock().await.sensor_ids()
    }

    /// Record a newly applied control state.
    ///
    /// Returns `Ok(false)` without touching disk when nothing changed. On a
    /// save failure the in-memory state is still updated.
    pub async fn record_control(&self, state: ControlState) -> Result<bool, StoreError> {
        let mut config = self.config.lock().await;
        if config.last_control_state == state {
            return Ok(false);
        }
        config.last_control_state = state;
        let _saving = self.save_lock.lock().await;
        let snapshot = config.clone();
        drop(config);
        self.persist(snapshot).await?;
        Ok(true)
    }

    /// Merge `remote` into the local document and persist any change.
    ///
    /// On a save failure the in-memory merge is kept; the error is returned
    /// so the caller can report it.
    pub async fn reconcile(
        &self,
        remote: &RemoteDeviceDocument,
    ) -> Result<Reconciliation, (Reconciliation, StoreError)> {
        let mut config = self.config.lock().await;
        let outcome = reconcile(&config, remote);
        if outcome.is_empty() {
            return Ok(outcome);
        }

        outcome.apply(&mut config);
        info!(fields = ?outcome.changed_fields(), "local config updated from remote");
        let _saving = self.save_lock.lock().await;
        let snapshot = config.clone();
        drop(config);
        match self.persist(snapshot).await {
            Ok(()) => Ok(outcome),
            Err(e) => Err((outcome, e)),
        }
    }

    /// Write `snapshot` on the blocking pool. Callers hold `save_lock`.
    async fn persist(&self, snapshot: DeviceConfig) -> Result<(), StoreError> {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.save(&snapshot))
            .await
            .map_err(|e| StoreError::Io {
                path: self.store.path().to_path_buf(),
                source: std::io::Error::other(e),
            })?
    }
}
