//! Shared append-only log file.

use parking_lot::{Mutex, MutexGuard};
use std::fs::{File, OpenOptions};
use std::io::{self, LineWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;

/// `~/.simple-relay/logs/relay.jsonl`, relative to the working directory when
/// there is no home directory.
pub fn default_log_path() -> PathBuf {
    let base = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    [".simple-relay", "logs", "relay.jsonl"]
        .iter()
        .fold(base, |path, part| path.join(part))
}

/// Log file opened in append mode and shared by every layer that writes to it.
///
/// Each [`MakeWriter::make_writer`] call locks the file for the lifetime of
/// the returned handle, so one event's line is never interleaved with
/// another thread's. [`LineWriter`] pushes every completed line to the OS.
#[derive(Clone)]
pub struct LogFile {
    path: Arc<PathBuf>,
    file: Arc<Mutex<LineWriter<File>>>,
}

impl LogFile {
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: Arc::new(path.to_path_buf()),
            file: Arc::new(Mutex::new(LineWriter::new(file))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Locked handle to a [`LogFile`].
pub struct LogFileHandle<'a>(MutexGuard<'a, LineWriter<File>>);

impl Write for LogFileHandle<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl<'a> MakeWriter<'a> for LogFile {
    type Writer = LogFileHandle<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        LogFileHandle(self.file.lock())
    }
}
