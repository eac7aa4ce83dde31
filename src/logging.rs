use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::{
    fmt,
    io::{self, Write},
    sync::Arc,
};
use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::config::WorkerId;

static TRACING_INIT: OnceCell<()> = OnceCell::new();

pub fn init_tracing() {
    TRACING_INIT.get_or_init(|| {
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy()
        });

        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(io::stderr)
            .finish();

        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

type Sink = Box<dyn Write + Send>;

/// Forwards worker output lines to the supervisor's own stdout/stderr,
/// prefixed with the worker id.
#[derive(Clone)]
pub struct EventLogger {
    inner: Arc<Mutex<LoggerInner>>,
}

impl EventLogger {
    pub fn stdio() -> Self {
        Self::with_writers(io::stdout(), io::stderr())
    }

    pub fn with_writers<O, E>(stdout: O, stderr: E) -> Self
    where
        O: Write + Send + 'static,
        E: Write + Send + 'static,
    {
        Self {
            inner: Arc::new(Mutex::new(LoggerInner {
                stdout: Box::new(stdout),
                stderr: Box::new(stderr),
            })),
        }
    }

    pub fn log(&self, event: LogEvent) -> Result<()> {
        let mut guard = self.inner.lock();
        guard.write_event(&event)
    }
}

impl fmt::Debug for EventLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLogger").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct LogEvent {
    pub worker: WorkerId,
    pub stream: LogStream,
    pub message: String,
}

impl LogEvent {
    pub fn new(worker: WorkerId, stream: LogStream, message: impl Into<String>) -> Self {
        Self {
            worker,
            stream,
            message: message.into(),
        }
    }

    fn format_line(&self) -> String {
        format!(
            "[W{worker} {stream}] {message}\n",
            worker = self.worker,
            stream = self.stream.label(),
            message = sanitize_message(&self.message)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl LogStream {
    pub fn label(self) -> &'static str {
        match self {
            LogStream::Stdout => "stdout",
            LogStream::Stderr => "stderr",
        }
    }
}

struct LoggerInner {
    stdout: Sink,
    stderr: Sink,
}

impl LoggerInner {
    fn write_event(&mut self, event: &LogEvent) -> Result<()> {
        let line = event.format_line();
        let sink = match event.stream {
            LogStream::Stdout => &mut self.stdout,
            LogStream::Stderr => &mut self.stderr,
        };
        sink.write_all(line.as_bytes())
            .with_context(|| format!("forwarding output of worker {}", event.worker))?;
        sink.flush().context("flushing forwarded output")?;
        Ok(())
    }
}

fn sanitize_message(message: &str) -> String {
    message
        .chars()
        .map(|ch| if ch == '\n' || ch == '\r' { ' ' } else { ch })
        .collect()
}

/// In-memory sink for capturing forwarded output in tests.
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub(crate) struct CaptureBuffer(Arc<Mutex<Vec<u8>>>);

#[cfg(test)]
impl CaptureBuffer {
    pub(crate) fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

#[cfg(test)]
impl Write for CaptureBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_streams_to_matching_sink_with_prefix() {
        let out = CaptureBuffer::default();
        let err = CaptureBuffer::default();
        let logger = EventLogger::with_writers(out.clone(), err.clone());

        logger
            .log(LogEvent::new(1, LogStream::Stdout, "Server 1 running on port 6001"))
            .unwrap();
        logger
            .log(LogEvent::new(3, LogStream::Stderr, "boom"))
            .unwrap();

        assert_eq!(out.contents(), "[W1 stdout] Server 1 running on port 6001\n");
        assert_eq!(err.contents(), "[W3 stderr] boom\n");
    }

    #[test]
    fn strips_embedded_line_breaks() {
        let out = CaptureBuffer::default();
        let logger = EventLogger::with_writers(out.clone(), io::sink());

        logger
            .log(LogEvent::new(2, LogStream::Stdout, "progress\r50%"))
            .unwrap();

        assert_eq!(out.contents(), "[W2 stdout] progress 50%\n");
    }

    #[test]
    fn init_tracing_is_idempotent() {
        init_tracing();
        init_tracing();
    }
}
