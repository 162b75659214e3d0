//! Append-only text log of snapshots.

use super::{ConsumeError, InitError, ShutdownError, Sink};
use crate::config::Config;
use crate::snapshot::Snapshot;
use async_trait::async_trait;
use chrono::Local;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

/// The log file itself; every method blocks on file I/O
struct LogFile {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl LogFile {
    fn append(&self, line: &str) -> io::Result<()> {
        let mut entry = String::with_capacity(line.len() + 1);
        entry.push_str(line);
        entry.push('\n');

        // A poisoned lock only means another writer panicked; the file is still usable
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(entry.as_bytes())
    }

    fn prepare(&self, marker: &str) -> io::Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                fs::create_dir_all(dir)?;
            }
        }
        self.append(marker)
    }
}

fn marker(event: &str) -> String {
    format!(
        "=== System Monitor Log {event} at {} ===",
        Local::now().format("%Y-%m-%d %H:%M:%S")
    )
}

/// Writes one line per snapshot, bracketed by start/end markers per run.
///
/// Each append opens the file in append mode, writes the whole line and
/// closes it again, all under the file's write lock, so lines from
/// overlapping dispatch cycles never interleave. The file is never truncated.
/// File I/O runs on the blocking pool.
pub struct LogSink {
    file: Arc<LogFile>,
    enabled: AtomicBool,
}

impl LogSink {
    pub fn new<P: AsRef<Path>>(path: P, enabled: bool) -> Self {
        Self {
            file: Arc::new(LogFile {
                path: path.as_ref().to_path_buf(),
                write_lock: Mutex::new(()),
            }),
            enabled: AtomicBool::new(enabled),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.monitoring.log_file_path, config.file_logging_enabled())
    }

    fn path(&self) -> PathBuf {
        self.file.path.clone()
    }

    async fn blocking<F>(&self, op: F) -> io::Result<()>
    where
        F: FnOnce(&LogFile) -> io::Result<()> + Send + 'static,
    {
        let file = Arc::clone(&self.file);
        tokio::task::spawn_blocking(move || op(&file))
            .await
            .map_err(io::Error::other)?
    }
}

#[async_trait]
impl Sink for LogSink {
    fn name(&self) -> &str {
        "FileLogger"
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// On failure the sink disables itself; the caller reports the error.
    async fn initialize(&self) -> Result<(), InitError> {
        if !self.enabled() {
            info!("FileLogger sink is disabled");
            return Ok(());
        }

        let start = marker("Started");
        match self.blocking(move |file| file.prepare(&start)).await {
            Ok(()) => {
                info!(path = %self.file.path.display(), "FileLogger sink initialized");
                Ok(())
            }
            Err(source) => {
                self.enabled.store(false, Ordering::Release);
                Err(InitError::Io {
                    path: self.path(),
                    source,
                })
            }
        }
    }

    async fn consume(&self, snapshot: &Snapshot) -> Result<(), ConsumeError> {
        if !self.enabled() {
            return Ok(());
        }

        let line = snapshot.log_line();
        let entry = line.clone();
        self.blocking(move |file| file.append(&entry))
            .await
            .map_err(|source| ConsumeError::Io {
                path: self.path(),
                source,
            })?;
        debug!(entry = %line, "snapshot logged to file");
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ShutdownError> {
        if !self.enabled() {
            return Ok(());
        }

        let end = marker("Ended");
        self.blocking(move |file| file.append(&end))
            .await
            .map_err(|source| ShutdownError::Io {
                path: self.path(),
                source,
            })?;
        info!("FileLogger sink shut down");
        Ok(())
    }
}
