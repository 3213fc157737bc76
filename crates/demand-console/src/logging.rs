use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::error::{Error, Result};

pub const ENV_LOG: &str = "DEMAND_LOG";
pub const DEFAULT_FILTER: &str = "demand_console=info,demand=info";
pub const DEFAULT_LOG_FILE: &str = "demand-console.log";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Where events are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget<'a> {
    Stderr,
    /// Appended to a file; used while the console owns the terminal.
    File(&'a Path),
}

fn env_filter() -> EnvFilter {
    let raw = std::env::var(ENV_LOG)
        .or_else(|_| std::env::var(EnvFilter::DEFAULT_ENV))
        .unwrap_or_default();
    if raw.trim().is_empty() {
        return EnvFilter::new(DEFAULT_FILTER);
    }
    EnvFilter::try_new(&raw).unwrap_or_else(|e| {
        eprintln!("warning: invalid log filter '{raw}': {e}; using '{DEFAULT_FILTER}'");
        EnvFilter::new(DEFAULT_FILTER)
    })
}

/// Installs the global subscriber. Calling it twice is harmless; the second
/// attempt is ignored.
pub fn init(format: LogFormat, target: LogTarget<'_>) -> Result<()> {
    let layer: Box<dyn Layer<Registry> + Send + Sync> = match target {
        LogTarget::Stderr => match format {
            LogFormat::Text => tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .boxed(),
            LogFormat::Json => tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .boxed(),
        },
        LogTarget::File(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| Error::msg(format!("failed to open log file {}: {e}", path.display())))?;
            match format {
                LogFormat::Text => tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .boxed(),
                LogFormat::Json => tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(Mutex::new(file))
                    .boxed(),
            }
        }
    };

    let _ = tracing_subscriber::registry()
        .with(layer.with_filter(env_filter()))
        .try_init();
    tracing::debug!(?format, "logging initialized");
    Ok(())
}
