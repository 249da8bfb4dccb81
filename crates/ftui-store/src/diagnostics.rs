#![forbid(unsafe_code)]

//! JSONL diagnostics sink for isolated notification failures.
//!
//! Subscriber panics never propagate to the writer that triggered them, so
//! they need a side channel. Every such event is logged through `tracing`;
//! when a [`DiagnosticSink`] is configured on the store it is also written
//! as one JSON line, in call order.

use std::fmt::Write as _;
use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Where store diagnostics go.
#[derive(Debug, Clone)]
pub enum DiagnosticSinkDestination {
    /// Process stderr, interleaved with any panic-hook output.
    Stderr,
    /// A JSONL file, opened in append mode.
    File(PathBuf),
}

impl DiagnosticSinkDestination {
    #[must_use]
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }
}

/// How [`DiagnosticSink::from_config`] builds a sink.
///
/// Off by default: a store without a sink still logs every failure through
/// `tracing`.
#[derive(Debug, Clone)]
pub struct DiagnosticSinkConfig {
    /// `false` makes `from_config` return `Ok(None)`.
    pub enabled: bool,
    pub destination: DiagnosticSinkDestination,
    /// Flush after every recorded event instead of on [`DiagnosticSink::flush`].
    pub flush_on_write: bool,
}

impl Default for DiagnosticSinkConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            destination: DiagnosticSinkDestination::Stderr,
            flush_on_write: true,
        }
    }
}

impl DiagnosticSinkConfig {
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Unbuffered events on stderr.
    #[must_use]
    pub fn enabled_stderr() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    /// Unbuffered events appended to `path`.
    #[must_use]
    pub fn enabled_file(path: impl Into<PathBuf>) -> Self {
        Self::enabled_stderr().with_destination(DiagnosticSinkDestination::file(path))
    }

    #[must_use]
    pub fn with_destination(mut self, destination: DiagnosticSinkDestination) -> Self {
        self.destination = destination;
        self
    }

    /// Buffer events until [`DiagnosticSink::flush`] when `false`.
    #[must_use]
    pub fn with_flush_on_write(mut self, flush: bool) -> Self {
        self.flush_on_write = flush;
        self
    }
}

/// A notification-side failure worth surfacing out of band.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// A change subscriber panicked while being notified.
    SubscriberPanicked {
        /// Path of the node whose emitter was firing.
        path: String,
        /// Panic message.
        message: String,
    },
    /// A re-entrant write was rejected by the nesting bound.
    ReentrancyLimit {
        /// Path of the node being written.
        path: String,
        /// Key being written.
        key: String,
        /// Notification depth at the time of the write.
        depth: usize,
    },
}

impl Diagnostic {
    /// Serialize to a single JSON line.
    #[must_use]
    pub fn to_jsonl(&self) -> String {
        match self {
            Self::SubscriberPanicked { path, message } => format!(
                r#"{{"event":"subscriber_panicked","path":"{}","message":"{}"}}"#,
                escape_json(path),
                escape_json(message)
            ),
            Self::ReentrancyLimit { path, key, depth } => format!(
                r#"{{"event":"reentrancy_limit","path":"{}","key":"{}","depth":{}}}"#,
                escape_json(path),
                escape_json(key),
                depth
            ),
        }
    }
}

fn escape_json(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if u32::from(c) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", u32::from(c));
            }
            c => out.push(c),
        }
    }
    out
}

struct DiagnosticSinkInner {
    writer: BufWriter<Box<dyn Write + Send>>,
    flush_on_write: bool,
}

/// Shared, line-oriented JSONL sink for diagnostics.
#[derive(Clone)]
pub struct DiagnosticSink {
    inner: Arc<Mutex<DiagnosticSinkInner>>,
}

impl std::fmt::Debug for DiagnosticSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagnosticSink").finish_non_exhaustive()
    }
}

impl DiagnosticSink {
    /// Build a sink from config. Returns `Ok(None)` when disabled.
    pub fn from_config(config: &DiagnosticSinkConfig) -> io::Result<Option<Self>> {
        if !config.enabled {
            return Ok(None);
        }

        let writer: Box<dyn Write + Send> = match &config.destination {
            DiagnosticSinkDestination::Stderr => Box::new(io::stderr()),
            DiagnosticSinkDestination::File(path) => {
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                Box::new(file)
            }
        };

        Ok(Some(Self::with_writer(writer, config.flush_on_write)))
    }

    /// Build a sink over an arbitrary writer.
    #[must_use]
    pub fn with_writer(writer: Box<dyn Write + Send>, flush_on_write: bool) -> Self {
        Self {
            inner: Arc::new(Mutex::new(DiagnosticSinkInner {
                writer: BufWriter::new(writer),
                flush_on_write,
            })),
        }
    }

    /// Write a single JSONL line with newline and optional flush.
    pub fn write_jsonl(&self, line: &str) -> io::Result<()> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| io::Error::other("diagnostic sink lock poisoned"))?;
        inner.writer.write_all(line.as_bytes())?;
        inner.writer.write_all(b"\n")?;
        if inner.flush_on_write {
            inner.writer.flush()?;
        }
        Ok(())
    }

    /// Write one diagnostic event.
    pub fn record(&self, diagnostic: &Diagnostic) -> io::Result<()> {
        self.write_jsonl(&diagnostic.to_jsonl())
    }

    /// Flush any buffered output.
    pub fn flush(&self) -> io::Result<()> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| io::Error::other("diagnostic sink lock poisoned"))?;
        inner.writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[test]
    fn disabled_config_builds_nothing() {
        let sink = DiagnosticSink::from_config(&DiagnosticSinkConfig::disabled()).unwrap();
        assert!(sink.is_none());
    }

    #[test]
    fn jsonl_escapes_strings() {
        let line = Diagnostic::SubscriberPanicked {
            path: "$.cart".into(),
            message: "bad \"quote\"\nnext".into(),
        }
        .to_jsonl();
        assert_eq!(
            line,
            r#"{"event":"subscriber_panicked","path":"$.cart","message":"bad \"quote\"\nnext"}"#
        );
        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["message"], "bad \"quote\"\nnext");
    }

    #[test]
    fn reentrancy_line_shape() {
        let line = Diagnostic::ReentrancyLimit {
            path: "$".into(),
            key: "n".into(),
            depth: 4,
        }
        .to_jsonl();
        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["event"], "reentrancy_limit");
        assert_eq!(parsed["depth"], 4);
    }

    #[test]
    fn writes_lines_in_order() {
        let buf = SharedBuf::default();
        let sink = DiagnosticSink::with_writer(Box::new(buf.clone()), true);
        sink.write_jsonl("{\"n\":1}").unwrap();
        sink.write_jsonl("{\"n\":2}").unwrap();
        assert_eq!(buf.contents(), "{\"n\":1}\n{\"n\":2}\n");
    }

    #[test]
    fn buffered_until_flush() {
        let buf = SharedBuf::default();
        let sink = DiagnosticSink::with_writer(Box::new(buf.clone()), false);
        sink.write_jsonl("{}").unwrap();
        assert!(buf.contents().is_empty());
        sink.flush().unwrap();
        assert_eq!(buf.contents(), "{}\n");
    }

    #[test]
    fn builders_redirect_and_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.jsonl");
        let config = DiagnosticSinkConfig::enabled_stderr()
            .with_destination(DiagnosticSinkDestination::file(&path))
            .with_flush_on_write(false);
        assert!(config.enabled);

        let sink = DiagnosticSink::from_config(&config).unwrap().unwrap();
        sink.record(&Diagnostic::ReentrancyLimit {
            path: "$.cart".into(),
            key: "total".into(),
            depth: 2,
        })
        .unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().is_empty());

        sink.flush().unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(parsed["key"], "total");
    }

    #[test]
    fn file_destination_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("diag.jsonl");
        let config = DiagnosticSinkConfig::enabled_file(&path);
        let sink = DiagnosticSink::from_config(&config).unwrap().unwrap();
        sink.record(&Diagnostic::SubscriberPanicked {
            path: "$".into(),
            message: "boom".into(),
        })
        .unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.contains("\"boom\""));
    }
}
