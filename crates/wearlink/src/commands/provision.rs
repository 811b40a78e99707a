//! First-run setup: write the default device configuration and upload the
//! first-contact remote document.

use dialoguer::{Input, Password};
use tracing::{info, warn};

use wearlink_api::FirebaseClient;
use wearlink_config::Settings;
use wearlink_core::{ConfigStore, DeviceConfig, ProvisionRequest, provision_local, upload_initial};

use crate::cli::ProvisionArgs;
use crate::error::{CliError, prompt_err};

const DEFAULT_DEVICE_NAME: &str = "Wearable";

pub async fn handle(args: ProvisionArgs, settings: &Settings) -> Result<(), CliError> {
    let store = ConfigStore::new(settings.device_config_path(), settings.layout.clone());
    let force = args.force;
    let request = gather(args, super::interactive())?;

    let config = provision(&store, &request, force)?;
    eprintln!("   ✓ Device configuration written to {}", store.path().display());

    if upload(settings, &config, force).await? {
        eprintln!("   ✓ Remote document created for '{}'", config.device_id);
    }
    Ok(())
}

/// Persist the default document, reporting validation failures against
/// the file they were meant for.
pub fn provision(
    store: &ConfigStore,
    request: &ProvisionRequest,
    force: bool,
) -> Result<DeviceConfig, CliError> {
    provision_local(store, request, force).map_err(|e| match e {
        wearlink_core::CoreError::ProvisioningRequired { reason } => {
            CliError::ProvisioningRequired {
                reason,
                path: store.path().display().to_string(),
            }
        }
        other => CliError::from(other),
    })
}

/// Upload the first-contact document when a database is configured.
///
/// Unreachable remotes are not fatal: the daemon uploads the document on
/// its first successful connection.
async fn upload(settings: &Settings, config: &DeviceConfig, force: bool) -> Result<bool, CliError> {
    if settings.remote.database_url.is_none() {
        info!("no database configured, skipping remote upload");
        return Ok(false);
    }

    let client = FirebaseClient::new(settings.firebase_config(&config.device_id)?)?;
    match upload_initial(&client, config, force).await {
        Ok(uploaded) => Ok(uploaded),
        Err(e) if e.is_transient() => {
            warn!(error = %e, "remote upload failed, the daemon will retry on first contact");
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

// ── Prompts ─────────────────────────────────────────────────────────

/// Fill in the request from flags, prompting for what is missing when
/// interactive. Missing values stay empty otherwise and fail validation.
pub fn gather(args: ProvisionArgs, interactive: bool) -> Result<ProvisionRequest, CliError> {
    let device_id = match args.device_id {
        Some(id) => id,
        None if interactive => Input::new()
            .with_prompt("Device ID")
            .interact_text()
            .map_err(prompt_err)?,
        None => String::new(),
    };

    let device_password = match args.password {
        Some(password) => password,
        None if interactive => Password::new()
            .with_prompt("Device password")
            .with_confirmation("Confirm password", "Passwords do not match")
            .interact()
            .map_err(prompt_err)?,
        None => String::new(),
    };

    let device_name = match args.name {
        Some(name) => name,
        None if interactive => Input::new()
            .with_prompt("Device name")
            .default(DEFAULT_DEVICE_NAME.to_owned())
            .interact_text()
            .map_err(prompt_err)?,
        None => DEFAULT_DEVICE_NAME.to_owned(),
    };

    Ok(ProvisionRequest {
        device_id,
        device_password,
        device_name,
    })
}
