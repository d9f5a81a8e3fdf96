use crossterm::style::Stylize;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

const PREFIX: &str = "Kryptonite ▶ ";

/// Where interactive status lines go. Cloned into every component that reports.
#[derive(Clone)]
pub struct Diagnostics {
    sink: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl Diagnostics {
    /// Opens the named terminal, falling back to stderr.
    pub fn open(tty: Option<&Path>) -> Self {
        let terminal = tty.and_then(|path| {
            OpenOptions::new()
                .read(true)
                .write(true)
                .open(path)
                .map_err(|err| {
                    tracing::debug!(event = "diagnostics_tty_error", path = %path.display(), error = %err);
                    err
                })
                .ok()
        });
        match terminal {
            Some(file) => Self::from_writer(file),
            None => Self::stderr(),
        }
    }

    pub fn stderr() -> Self {
        Self::from_writer(io::stderr())
    }

    pub fn from_writer<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            sink: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    pub fn info(&self, message: &str) {
        self.line(format!("{PREFIX}{message}").cyan().to_string());
    }

    pub fn success(&self, message: &str) {
        self.line(format!("{PREFIX}{message}").green().to_string());
    }

    pub fn warn(&self, message: &str) {
        self.line(format!("{PREFIX}{message}").yellow().to_string());
    }

    pub fn error(&self, message: &str) {
        self.line(format!("{PREFIX}{message}").red().to_string());
    }

    /// Streamed progress text, written as received.
    pub fn notify(&self, text: &str) {
        self.write_raw(text);
    }

    fn line(&self, styled: String) {
        self.write_raw(&format!("{styled}\r\n"));
    }

    fn write_raw(&self, text: &str) {
        if let Ok(mut sink) = self.sink.lock() {
            let _ = sink.write_all(text.as_bytes());
            let _ = sink.flush();
        }
    }
}

/// Shared in-memory writer; lets callers read back what was written.
#[derive(Clone, Default)]
pub struct MemorySink(Arc<Mutex<Vec<u8>>>);

impl MemorySink {
    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().map(|buf| buf.clone()).unwrap_or_default()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }
}

impl Write for MemorySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self
            .0
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "sink poisoned"))?;
        inner.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
