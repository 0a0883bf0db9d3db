//! Append-only audit log for external command output.
//!
//! Every byte a child process writes to stdout or stderr is mirrored into a
//! [`LogSink`]. The sink is a cheap-to-clone handle; all clones share the same
//! destination. [`LogSink::silence`] temporarily routes writes to nowhere and
//! restores the previous destination when the returned guard drops.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

enum Destination {
    Discard,
    File { path: PathBuf, file: File },
    Memory(Vec<u8>),
}

/// Shared handle to the command audit log
#[derive(Clone)]
pub struct LogSink {
    inner: Arc<Mutex<Destination>>,
}

impl std::fmt::Debug for LogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let dest = match &*self.inner.lock() {
            Destination::Discard => "discard".to_string(),
            Destination::File { path, .. } => path.display().to_string(),
            Destination::Memory(_) => "memory".to_string(),
        };
        f.debug_struct("LogSink").field("destination", &dest).finish()
    }
}

impl LogSink {
    /// A sink that drops everything
    pub fn discard() -> Self {
        Self::with(Destination::Discard)
    }

    /// An in-memory sink, readable through [`LogSink::contents`]
    pub fn memory() -> Self {
        Self::with(Destination::Memory(Vec::new()))
    }

    /// Open `path` for appending, truncating anything left from a previous run.
    ///
    /// Parent directories are created as needed.
    pub fn file(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        drop(file);
        let file = OpenOptions::new().append(true).open(path)?;
        Ok(Self::with(Destination::File {
            path: path.to_path_buf(),
            file,
        }))
    }

    fn with(dest: Destination) -> Self {
        Self {
            inner: Arc::new(Mutex::new(dest)),
        }
    }

    /// Append raw bytes to the current destination.
    ///
    /// Write failures are logged and swallowed; the audit log never fails a command.
    pub fn write(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let mut dest = self.inner.lock();
        match &mut *dest {
            Destination::Discard => {}
            Destination::Memory(buf) => buf.extend_from_slice(bytes),
            Destination::File { path, file } => {
                if let Err(e) = file.write_all(bytes) {
                    warn!(path = %path.display(), error = %e, "failed to write command log");
                }
            }
        }
    }

    /// Path of the backing file, if the sink currently writes to one
    pub fn path(&self) -> Option<PathBuf> {
        match &*self.inner.lock() {
            Destination::File { path, .. } => Some(path.clone()),
            _ => None,
        }
    }

    /// Bytes captured by a memory sink. Empty for other destinations.
    pub fn contents(&self) -> Vec<u8> {
        match &*self.inner.lock() {
            Destination::Memory(buf) => buf.clone(),
            _ => Vec::new(),
        }
    }

    /// Route writes to nowhere until the returned guard is dropped.
    pub fn silence(&self) -> SilenceGuard {
        let previous = std::mem::replace(&mut *self.inner.lock(), Destination::Discard);
        SilenceGuard {
            sink: self.clone(),
            previous: Some(previous),
        }
    }
}

/// Restores a [`LogSink`]'s destination on drop
#[must_use = "the sink is restored as soon as the guard is dropped"]
pub struct SilenceGuard {
    sink: LogSink,
    previous: Option<Destination>,
}

impl Drop for SilenceGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            *self.sink.inner.lock() = previous;
        }
    }
}
