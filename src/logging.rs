//! Tracing subscriber setup for the command-line binary.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::AppError;

/// Default directives when `RUST_LOG` is unset.
fn default_directives(verbose: bool) -> &'static str {
    if verbose {
        "debug,hyper=warn,reqwest=warn,rustls=warn"
    } else {
        "info,hyper=warn,reqwest=warn,rustls=warn"
    }
}

/// Builds the level filter; `RUST_LOG` wins over the verbosity flag.
pub fn build_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)))
}

/// Installs the global subscriber.
///
/// Human-readable output goes to stderr. With `log_file`, every event is also
/// appended to that file as one JSON object per line.
///
/// # Errors
///
/// Returns `AppError::Filesystem` if the log file cannot be opened and
/// `AppError::Configuration` if a subscriber is already installed.
pub fn init(verbose: bool, log_file: Option<&Path>) -> Result<(), AppError> {
    let json_layer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| AppError::fs(parent, e))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| AppError::fs(path, e))?;
            Some(
                fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(build_filter(verbose))
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(json_layer)
        .try_init()
        .map_err(|e| AppError::Configuration(format!("Logging already initialised: {}", e)))
}
