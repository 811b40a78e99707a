// ── Persisted device configuration ──
//
// One JSON document on disk. Saves go through a sibling temp file and a
// rename, so a crash mid-write leaves the previous document intact.
// Documents that fail to parse or validate are moved aside to
// `<name>.corrupted` and reported, never deleted.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::DeviceLayout;
use crate::model::DeviceConfig;
use crate::model::control::normalize_document;

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no device configuration at {}", path.display())]
    NotFound { path: PathBuf },

    #[error("device configuration at {} is corrupted ({reason}); moved to {}", path.display(), backup.display())]
    Corrupted {
        path: PathBuf,
        backup: PathBuf,
        reason: String,
    },

    #[error("invalid device configuration: {reason}")]
    Invalid { reason: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize device configuration: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether the caller should fall back to provisioning.
    pub fn needs_provisioning(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::Corrupted { .. })
    }
}

// ── ConfigStore ─────────────────────────────────────────────────────

/// Loads and saves the [`DeviceConfig`] document.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    layout: DeviceLayout,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>, layout: DeviceLayout) -> Self {
        Self {
            path: path.into(),
            layout,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn layout(&self) -> &DeviceLayout {
        &self.layout
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Path a corrupted document is moved to.
    pub fn backup_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".corrupted");
        self.path.with_file_name(name)
    }

    /// Load, migrate, and validate the document.
    ///
    /// Per-sensor control documents (in `last_control_state` or presets)
    /// are migrated to the group shape on the way in.
    pub fn load(&self) -> Result<DeviceConfig, StoreError> {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    path: self.path.clone(),
                });
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        match self.decode(&raw) {
            Ok(config) => {
                debug!(path = %self.path.display(), device_id = %config.device_id, "loaded device config");
                Ok(config)
            }
            Err(reason) => Err(self.quarantine(reason)),
        }
    }

    fn decode(&self, raw: &[u8]) -> Result<DeviceConfig, String> {
        let mut value: Value = serde_json::from_slice(raw).map_err(|e| e.to_string())?;

        if let Some(control) = value.get_mut("last_control_state") {
            normalize_document(control, &self.layout);
        }
        if let Some(Value::Object(presets)) = value.get_mut("presets") {
            for preset in presets.values_mut() {
                normalize_document(preset, &self.layout);
            }
        }

        let config: DeviceConfig = serde_json::from_value(value).map_err(|e| e.to_string())?;
        config.validate()?;
        Ok(config)
    }

    fn quarantine(&self, reason: String) -> StoreError {
        let backup = self.backup_path();
        match std::fs::rename(&self.path, &backup) {
            Ok(()) => {
                warn!(
                    path = %self.path.display(),
                    backup = %backup.display(),
                    reason,
                    "device config corrupted, moved aside"
                );
                StoreError::Corrupted {
                    path: self.path.clone(),
                    backup,
                    reason,
                }
            }
            Err(source) => StoreError::Io {
                path: backup,
                source,
            },
        }
    }

    /// Write the document atomically (temp file, fsync, rename).
    pub fn save(&self, config: &DeviceConfig) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err(parent))?;
        }

        let body = serde_json::to_vec_pretty(config)?;
        let tmp = self.temp_path();
        {
            let mut file = std::fs::File::create(&tmp).map_err(io_err(&tmp))?;
            file.write_all(&body).map_err(io_err(&tmp))?;
            file.sync_all().map_err(io_err(&tmp))?;
        }
        std::fs::rename(&tmp, &self.path).map_err(io_err(&self.path))?;
        debug!(path = %self.path.display(), "saved device config");
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + use<> {
    let path = path.to_path_buf();
    move |source| StoreError::Io { path, source }
}
