//! Configuration, filesystem paths and logging setup for SimpleRelay hosts.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{Config, DEFAULT_LOG_LEVEL, DEFAULT_RELAY_HTTPS_URL, DEFAULT_RELAY_WSS_URL};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, parse_level};
pub use paths::Paths;
