mod cli;
mod commands;
mod error;

use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use wearlink_config::LoggingSection;

use crate::cli::{Cli, Command, ConfigCommand};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Settings are loaded up front so file logging can be configured;
    // `config path` and `config init` must work without a valid file.
    let settings = match cli.command {
        Command::Config(ref args) if !matches!(args.command, ConfigCommand::Show) => None,
        _ => Some(wearlink_config::load(cli.global.config.as_deref())),
    };
    let logging = settings
        .as_ref()
        .and_then(|s| s.as_ref().ok())
        .map(|s| &s.logging);

    let daemon = matches!(cli.command, Command::Run);
    let guard = init_tracing(cli.global.verbose, daemon, logging);

    // Dispatch and handle errors with proper exit codes
    if let Err(err) = run(cli, settings).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        drop(guard);
        std::process::exit(code);
    }
}

/// Install the subscriber. `RUST_LOG` wins over `-v`. The returned guard
/// flushes the file writer and must live until exit.
fn init_tracing(
    verbosity: u8,
    daemon: bool,
    logging: Option<&LoggingSection>,
) -> Option<WorkerGuard> {
    let filter = match (verbosity, daemon) {
        (0, true) => "info",
        (0, false) => "warn",
        (1, _) => "debug",
        _ => "trace",
    };
    let env_filter =
        || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let console = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(env_filter());

    let (file, guard) = match logging.and_then(|l| l.directory.as_deref().map(|dir| (dir, l.json))) {
        Some((dir, json)) => {
            let appender = tracing_appender::rolling::daily(dir, "wearlink.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = if json {
                fmt::layer().json().with_writer(writer).with_ansi(false).boxed()
            } else {
                fmt::layer().with_writer(writer).with_ansi(false).boxed()
            };
            (Some(layer.with_filter(env_filter())), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry().with(console).with(file).init();
    guard
}

async fn run(
    cli: Cli,
    settings: Option<Result<wearlink_config::Settings, wearlink_config::ConfigError>>,
) -> Result<(), CliError> {
    let settings = settings.transpose()?;

    match cli.command {
        Command::Config(args) => commands::config_cmd::handle(args, &cli.global, settings.as_ref()),
        command => {
            let settings =
                settings.ok_or_else(|| CliError::Internal("settings not loaded".into()))?;
            tracing::debug!(command = ?command, "dispatching command");
            commands::dispatch(command, &settings).await
        }
    }
}
