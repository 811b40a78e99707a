// ── First-run provisioning ──
//
// Creates the default DeviceConfig for a new device, saves it, and
// uploads the first-contact remote document. Unlike normal operation,
// missing identity here is fatal.

use tracing::{info, warn};
use wearlink_api::RemoteLink;

use crate::error::CoreError;
use crate::model::DeviceConfig;
use crate::model::paths;
use crate::model::remote::initial_document;
use crate::store::ConfigStore;

/// Identity of the device being provisioned.
#[derive(Debug, Clone, Default)]
pub struct ProvisionRequest {
    pub device_id: String,
    pub device_password: String,
    pub device_name: String,
}

/// Build, validate and persist the default document for `request`.
///
/// An existing valid document is kept unless `force` is set. An existing
/// corrupt one has already been quarantined by the load attempt and is
/// replaced.
pub fn provision_local(
    store: &ConfigStore,
    request: &ProvisionRequest,
    force: bool,
) -> Result<DeviceConfig, CoreError> {
    if store.exists() && !force {
        match store.load() {
            Ok(existing) => {
                return Err(CoreError::AlreadyProvisioned {
                    device_id: existing.device_id,
                });
            }
            Err(e) => warn!(error = %e, "replacing unreadable device config"),
        }
    }

    let config = DeviceConfig::new_default(
        request.device_id.trim(),
        request.device_password.as_str(),
        request.device_name.trim(),
        store.layout(),
    );
    config
        .validate_for_provisioning()
        .map_err(|reason| CoreError::ProvisioningRequired { reason })?;

    store.save(&config)?;
    info!(device_id = %config.device_id, path = %store.path().display(), "device config written");
    Ok(config)
}

/// Upload the first-contact document.
///
/// Returns `false` without writing if the remote document already exists
/// and `overwrite` is not set; the daemon reconciles it on its next start.
pub async fn upload_initial(
    remote: &dyn RemoteLink,
    config: &DeviceConfig,
    overwrite: bool,
) -> Result<bool, CoreError> {
    remote.connect().await?;

    if !overwrite && remote.get(paths::ROOT).await?.is_some() {
        info!(device_id = %config.device_id, "remote document exists, leaving it in place");
        return Ok(false);
    }

    remote.set(paths::ROOT, initial_document(config)).await?;
    info!(device_id = %config.device_id, "remote document uploaded");
    Ok(true)
}
