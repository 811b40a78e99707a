//! The daemon: load the device configuration, wire the transports into a
//! [`Bridge`], and run until SIGINT or SIGTERM.

use std::sync::Arc;

use tracing::{info, warn};

use wearlink_api::{FirebaseClient, RemoteLink, SerialLink, TokioSerialLink};
use wearlink_config::Settings;
use wearlink_core::{Bridge, ConfigStore, ProvisionRequest, Session};

use crate::cli::ProvisionArgs;
use crate::commands::provision;
use crate::error::CliError;

pub async fn handle(settings: &Settings) -> Result<(), CliError> {
    let store = ConfigStore::new(settings.device_config_path(), settings.layout.clone());
    let session = load_session(store)?;
    let device_id = session.device_id().await;

    let remote: Arc<dyn RemoteLink> =
        Arc::new(FirebaseClient::new(settings.firebase_config(&device_id)?)?);
    let serial: Arc<dyn SerialLink> = Arc::new(TokioSerialLink::new(settings.serial_config()));
    info!(
        device_id = %device_id,
        serial = %serial.describe(),
        "starting bridge"
    );

    let bridge = Bridge::new(settings.bridge_config(), Arc::new(session), remote, serial);
    let report = bridge.run_until(shutdown_signal()).await?;
    info!(
        offline_published = report.offline_published,
        serial_closed = report.serial_closed,
        "bridge exited cleanly"
    );
    Ok(())
}

/// Load the persisted document, falling back to inline provisioning when
/// it is missing or quarantined and someone is at the keyboard.
fn load_session(store: ConfigStore) -> Result<Session, CliError> {
    match Session::load(store.clone()) {
        Ok(session) => Ok(session),
        Err(e) if e.needs_provisioning() && super::interactive() => {
            warn!(error = %e, "device is not provisioned");
            eprintln!("No usable device configuration at {}.", store.path().display());
            let request: ProvisionRequest = provision::gather(
                ProvisionArgs {
                    device_id: None,
                    password: None,
                    name: None,
                    force: true,
                },
                true,
            )?;
            let config = provision::provision(&store, &request, true)?;
            Ok(Session::new(config, store))
        }
        Err(e) => Err(e.into()),
    }
}

/// Resolves on Ctrl+C, or SIGTERM on Unix.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = match signal(SignalKind::terminate()) {
            Ok(sig) => Some(sig),
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler, only Ctrl+C will stop the bridge");
                None
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            () = async {
                match term.as_mut() {
                    Some(sig) => {
                        sig.recv().await;
                    }
                    None => std::future::pending::<()>().await,
                }
            } => {},
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
