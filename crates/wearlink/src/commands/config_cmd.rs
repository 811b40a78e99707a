//! Config subcommand handlers.

use std::path::PathBuf;

use wearlink_config::Settings;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::error::CliError;

fn settings_path(global: &GlobalOpts) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(wearlink_config::config_path)
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(
    args: ConfigArgs,
    global: &GlobalOpts,
    settings: Option<&Settings>,
) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            let path = settings_path(global);
            println!("settings: {}", path.display());
            // The device document path comes from the settings file when it
            // can be read, else the default.
            let device = wearlink_config::load(global.config.as_deref())
                .unwrap_or_default()
                .device_config_path();
            println!("device:   {}", device.display());
            Ok(())
        }

        ConfigCommand::Show => {
            let settings =
                settings.ok_or_else(|| CliError::Internal("settings not loaded".into()))?;
            print!("{}", settings.redacted().to_toml()?);
            Ok(())
        }

        ConfigCommand::Init { force } => {
            let path = settings_path(global);
            if path.exists() && !force {
                return Err(CliError::ConfigExists {
                    path: path.display().to_string(),
                });
            }
            wearlink_config::save(&Settings::default(), &path)?;
            eprintln!("   ✓ Settings written to {}", path.display());
            Ok(())
        }
    }
}
