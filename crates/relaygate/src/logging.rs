//! tracing setup for the different commands

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use anyhow::Result;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

fn env_filter() -> Result<EnvFilter> {
    Ok(EnvFilter::from_default_env()
        .add_directive("relaygate=info".parse()?)
        .add_directive("relaygate_core=info".parse()?)
        .add_directive("relaygate_tui=info".parse()?))
}

/// Supervisor process: everything to stdout, warnings and errors also to
/// stderr (the unit appends them to the service and error logs)
pub fn init_service() -> Result<()> {
    tracing_subscriber::registry()
        .with(env_filter()?)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stdout))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr.with_max_level(Level::WARN)),
        )
        .init();
    Ok(())
}

/// Operator commands: terminal output plus the persistent install log
///
/// `quiet` limits the terminal to warnings (the menu draws its own output).
/// An install log that cannot be opened (not root, read-only fs) is skipped.
pub fn init_cli(log_file: &Path, quiet: bool) -> Result<()> {
    let file_layer = open_log(log_file).map(|file| {
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(Mutex::new(file))
    });

    let terminal_level = if quiet { Level::WARN } else { Level::INFO };

    tracing_subscriber::registry()
        .with(env_filter()?)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr.with_max_level(terminal_level)),
        )
        .with(file_layer)
        .init();
    Ok(())
}

fn open_log(path: &Path) -> Option<std::fs::File> {
    if let Some(parent) = path.parent() {
        if std::fs::create_dir_all(parent).is_err() {
            return None;
        }
    }
    OpenOptions::new().create(true).append(true).open(path).ok()
}
