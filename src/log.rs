use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::JsonFields;
use tracing_subscriber::prelude::*;

use crate::config;

const DEFAULT_DIRECTIVE: &str = "info";

/// Installs the JSON file logger and returns the log path. stdout carries
/// the protocol, so nothing is ever written there.
pub fn init(directive: Option<&str>) -> anyhow::Result<PathBuf> {
    let log_path = config::log_path();
    let log_file = open_log_file(&log_path)?;

    // Index queries and backend I/O run on blocking threads; name them.
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_thread_names(true)
        .with_writer(log_file)
        .fmt_fields(JsonFields::default());

    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    tracing_subscriber::registry()
        .with(filter(rust_log.as_deref(), directive))
        .with(json_layer)
        .try_init()?;

    Ok(log_path)
}

/// Opens `path` for appending, creating its directory first.
fn open_log_file(path: &Path) -> anyhow::Result<File> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).inspect_err(|e| {
            eprintln!("Failed to create data directory {:?}: {}", dir, e);
        })?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .inspect_err(|e| {
            eprintln!("Failed to open log file {:?}: {}", path, e);
        })?;
    Ok(file)
}

/// RUST_LOG wins over `--log-level`, which wins over `info`. Directives
/// that fail to parse are skipped.
fn filter(rust_log: Option<&str>, directive: Option<&str>) -> EnvFilter {
    [rust_log, directive]
        .into_iter()
        .flatten()
        .find_map(|candidate| {
            EnvFilter::try_new(candidate)
                .inspect_err(|e| eprintln!("Ignoring log filter {:?}: {}", candidate, e))
                .ok()
        })
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_DIRECTIVE))
}
