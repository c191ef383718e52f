//! On-disk layout of a SimpleRelay host.
//!
//! ```text
//! <base>/config.json        host settings
//! <base>/kvs.json           saved connection records, keyed by local id
//! <base>/logs/relay.jsonl   structured log
//! ```

use crate::{CoreError, CoreResult};
use std::path::{Path, PathBuf};

const BASE_DIR_NAME: &str = ".simple-relay";
const CONFIG_FILE: &str = "config.json";
const STORE_FILE: &str = "kvs.json";
const LOGS_DIR: &str = "logs";
const LOG_FILE: &str = "relay.jsonl";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    base_dir: PathBuf,
}

impl Paths {
    /// Layout rooted at `~/.simple-relay`.
    pub fn new() -> CoreResult<Self> {
        dirs::home_dir()
            .map(|home| Self::with_base_dir(home.join(BASE_DIR_NAME)))
            .ok_or_else(|| CoreError::Path("no home directory to put .simple-relay in".into()))
    }

    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// `override_dir` when given, the home layout otherwise.
    pub fn resolve(override_dir: Option<PathBuf>) -> CoreResult<Self> {
        match override_dir {
            Some(dir) => Ok(Self::with_base_dir(dir)),
            None => Self::new(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join(CONFIG_FILE)
    }

    pub fn store_file(&self) -> PathBuf {
        self.base_dir.join(STORE_FILE)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join(LOGS_DIR)
    }

    pub fn log_file(&self) -> PathBuf {
        self.logs_dir().join(LOG_FILE)
    }

    /// Create the base and log directories. Idempotent.
    pub fn ensure_dirs(&self) -> CoreResult<()> {
        // logs/ is nested under the base, so this creates both.
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}
