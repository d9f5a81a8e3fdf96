//! Progress notifications for an in-flight request.
//!
//! The channel is a file the agent appends newline-terminated messages to. The
//! client creates it before sending the request, tails it while waiting and
//! deletes it afterwards. Deleting the file ends the tail.

use crate::diagnostics::Diagnostics;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::task::JoinHandle;
use tracing::debug;

pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification channel removed")]
    Removed,
    #[error("notification channel i/o error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationChannel {
    name: String,
    path: PathBuf,
}

impl NotificationChannel {
    /// Creates an empty channel file `<dir>/<name>`, owner-only on unix.
    pub fn create(dir: &Path, name: &str) -> io::Result<Self> {
        if name.is_empty() || name.contains(std::path::is_separator) || name.starts_with('.') {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid notification channel name '{name}'"),
            ));
        }
        std::fs::create_dir_all(dir)?;
        let path = dir.join(name);
        let mut options = std::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        options.open(&path)?;
        Ok(Self {
            name: name.to_string(),
            path,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn open_reader(&self) -> io::Result<NotificationReader> {
        let file = File::open(&self.path).await?;
        Ok(NotificationReader {
            path: self.path.clone(),
            file,
            pending: Vec::new(),
        })
    }

    /// Best effort; a channel that is already gone is fine.
    pub fn remove(&self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            if err.kind() != io::ErrorKind::NotFound {
                debug!(event = "notify_channel_remove_error", path = %self.path.display(), error = %err);
            }
        }
    }
}

pub struct NotificationReader {
    path: PathBuf,
    file: File,
    pending: Vec<u8>,
}

impl NotificationReader {
    /// Next complete message, `Ok(None)` if nothing new has been appended yet.
    pub async fn read(&mut self) -> Result<Option<String>, NotifyError> {
        loop {
            if let Some(newline) = self.pending.iter().position(|byte| *byte == b'\n') {
                let line = self.pending.drain(..=newline).collect::<Vec<u8>>();
                return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
            }
            let mut buf = [0u8; 4096];
            let read = self.file.read(&mut buf).await?;
            if read == 0 {
                return match tokio::fs::metadata(&self.path).await {
                    Ok(_) => Ok(None),
                    Err(err) if err.kind() == io::ErrorKind::NotFound => Err(NotifyError::Removed),
                    Err(err) => Err(NotifyError::Io(err)),
                };
            }
            self.pending.extend_from_slice(&buf[..read]);
        }
    }
}

/// Prints each distinct message once, in arrival order, until the channel
/// read fails. The seen set lives only as long as the task.
pub struct NotificationStreamer {
    reader: NotificationReader,
    diagnostics: Diagnostics,
    poll_interval: Duration,
    seen: HashSet<String>,
}

impl NotificationStreamer {
    pub fn new(reader: NotificationReader, diagnostics: Diagnostics) -> Self {
        Self {
            reader,
            diagnostics,
            poll_interval: POLL_INTERVAL,
            seen: HashSet::new(),
        }
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Runs on its own task; resolves to the number of messages printed.
    pub fn spawn(self) -> JoinHandle<usize> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) -> usize {
        loop {
            match self.reader.read().await {
                Ok(Some(message)) => {
                    if self.seen.contains(&message) {
                        continue;
                    }
                    self.diagnostics.notify(&message);
                    self.seen.insert(message);
                }
                Ok(None) => tokio::time::sleep(self.poll_interval).await,
                Err(err) => {
                    debug!(event = "notify_stream_end", reason = %err, printed = self.seen.len());
                    return self.seen.len();
                }
            }
        }
    }
}
