//! Command dispatch for everything that needs loaded settings.

pub mod config_cmd;
pub mod provision;
pub mod run;

use std::io::IsTerminal;

use wearlink_config::Settings;

use crate::cli::Command;
use crate::error::CliError;

/// Dispatch a settings-bound command to its handler.
pub async fn dispatch(cmd: Command, settings: &Settings) -> Result<(), CliError> {
    match cmd {
        Command::Run => run::handle(settings).await,
        Command::Provision(args) => provision::handle(args, settings).await,
        Command::Config(_) => Err(CliError::Internal(
            "config commands are handled before dispatch".into(),
        )),
    }
}

/// Prompts are only shown when a person is at the keyboard.
pub fn interactive() -> bool {
    std::io::stdin().is_terminal() && std::io::stderr().is_terminal()
}
