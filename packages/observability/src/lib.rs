//! # Observability
//!
//! Logging setup shared by SimpleRelay hosts.
//!
//! Hosts call `observability::init()` once at startup and use the standard
//! `tracing` macros everywhere else. Every event is written as one JSON line
//! to a central file (`~/.simple-relay/logs/relay.jsonl` by default), which
//! can be followed with `tail -f ... | jq`. A compact human-readable copy can
//! be mirrored to stderr for foreground use.
//!
//! ## Usage
//!
//! ```rust,ignore
//! fn main() {
//!     observability::init("simple-relay");
//!     tracing::info!("relay host started");
//! }
//! ```
//!
//! Or with configuration:
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "simple-relay".into(),
//!     default_level: "debug".into(),
//!     also_stderr: true,
//!     ..Default::default()
//! });
//! ```

mod json_layer;
mod writer;

use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub use json_layer::{JsonLayer, LogEntry};
pub use writer::{default_log_path, LogFile, LogFileHandle};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service, included in every log line for filtering.
    pub service_name: String,

    /// Default log level filter (e.g., "debug", "info", "warn").
    /// Can be overridden by `RUST_LOG` environment variable.
    pub default_level: String,

    /// Optional custom log file path.
    /// Defaults to `~/.simple-relay/logs/relay.jsonl`.
    pub log_path: Option<PathBuf>,

    /// Also emit logs to stderr for immediate feedback.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
        }
    }
}

/// Initialize the observability layer with default settings.
pub fn init(service_name: &str) {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    });
}

/// Initialize the observability layer with custom configuration.
///
/// Calling this more than once is harmless: later calls leave the first
/// subscriber in place. If the log file cannot be opened the host still gets
/// stderr output.
pub fn init_with_config(config: LogConfig) {
    let log_path = config.log_path.clone().unwrap_or_else(default_log_path);

    let log_file = match LogFile::open(&log_path) {
        Ok(file) => file,
        Err(e) => {
            eprintln!(
                "observability: cannot open {} ({}), logging to stderr only",
                log_path.display(),
                e
            );
            init_stderr_only(&config);
            return;
        }
    };

    let json_layer = JsonLayer::new(config.service_name.clone(), log_file);

    let stderr_layer = config.also_stderr.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .compact()
    });

    let _ = tracing_subscriber::registry()
        .with(env_filter(&config.default_level))
        .with(json_layer)
        .with(stderr_layer)
        .try_init();
}

fn init_stderr_only(config: &LogConfig) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(&config.default_level))
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact()
        .try_init();
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Re-export tracing macros for convenience.
/// Services can use `observability::info!()` or `tracing::info!()`.
pub use tracing::{debug, error, info, instrument, trace, warn};

/// Re-export Level for advanced filtering.
pub use tracing::Level;
