//! Logging setup for SimpleRelay hosts.
//!
//! Structured JSONL goes to the host's log file through the observability
//! crate, with an optional compact copy on stderr.

use std::path::PathBuf;
use tracing::Level;

const SERVICE_NAME: &str = "simple-relay";

/// Network stack crates that stay at `warn` whatever level the relay uses.
/// tungstenite logs every frame at debug and hyper every pooled connection.
const QUIET_DEPS: &[&str] = &[
    "tungstenite",
    "tokio_tungstenite",
    "hyper",
    "hyper_util",
    "reqwest",
    "rustls",
];

/// Install the global subscriber. `RUST_LOG` replaces the computed filter
/// when set.
///
/// ```ignore
/// init_logging("debug", Some(paths.log_file()), true);
/// ```
pub fn init_logging(level: &str, log_path: Option<PathBuf>, also_stderr: bool) {
    observability::init_with_config(observability::LogConfig {
        service_name: SERVICE_NAME.into(),
        default_level: filter_directive(parse_level(level)),
        log_path,
        also_stderr,
    });
}

/// Unknown names fall back to `INFO`.
pub fn parse_level(level: &str) -> Level {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// `EnvFilter` directive: `level` for everything, capped at `warn` for
/// [`QUIET_DEPS`].
pub fn filter_directive(level: Level) -> String {
    let base = level.as_str().to_ascii_lowercase();
    if level < Level::WARN {
        // ERROR is the only level stricter than WARN; the caps would loosen it.
        return base;
    }
    std::iter::once(base)
        .chain(QUIET_DEPS.iter().map(|dep| format!("{dep}=warn")))
        .collect::<Vec<_>>()
        .join(",")
}
