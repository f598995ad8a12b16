//! In-memory ring buffer of recent log lines, fed by a `tracing` layer.
//!
//! Backs the GetLogs/DeleteLogs operations. The buffer is saved to disk on
//! settings reload and shutdown and restored at startup.

use std::collections::VecDeque;
use std::fmt::{self, Write as _};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

/// Shared handle to the ring buffer.
#[derive(Clone)]
pub struct LogBuffer {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity: capacity.max(1),
        }
    }

    fn guard(&self) -> MutexGuard<'_, VecDeque<String>> {
        self.lines.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a line, evicting the oldest when full.
    pub fn push(&self, line: String) {
        let mut lines = self.guard();
        while lines.len() >= self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// Lines from oldest to newest.
    pub fn lines(&self) -> Vec<String> {
        self.guard().iter().cloned().collect()
    }

    /// Drop all lines, returning how many were removed.
    pub fn clear(&self) -> usize {
        let mut lines = self.guard();
        let n = lines.len();
        lines.clear();
        n
    }

    /// A `tracing` layer that records every event it sees into this buffer.
    pub fn layer(&self) -> LogBufferLayer {
        LogBufferLayer {
            buffer: self.clone(),
        }
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_vec(&self.lines()).map_err(std::io::Error::other)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)
    }

    /// Load previously saved lines in front of anything already buffered.
    /// A missing file restores nothing.
    pub fn restore(&self, path: &Path) -> std::io::Result<usize> {
        let raw = match std::fs::read(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };
        let saved: Vec<String> = serde_json::from_slice(&raw).map_err(std::io::Error::other)?;
        let restored = saved.len();

        let mut lines = self.guard();
        let current: Vec<String> = lines.drain(..).collect();
        for line in saved.into_iter().chain(current) {
            while lines.len() >= self.capacity {
                lines.pop_front();
            }
            lines.push_back(line);
        }
        Ok(restored)
    }
}

pub struct LogBufferLayer {
    buffer: LogBuffer,
}

impl<S: Subscriber> Layer<S> for LogBufferLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);

        let level = if visitor.critical {
            "CRITICAL"
        } else {
            level_name(event.metadata().level())
        };
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        let mut line = format!("{timestamp} [{level}] {}", visitor.message);
        if !visitor.fields.is_empty() {
            line.push(' ');
            line.push_str(&visitor.fields);
        }
        self.buffer.push(line);
    }
}

fn level_name(level: &Level) -> &'static str {
    match *level {
        Level::ERROR => "ERROR",
        Level::WARN => "WARN",
        Level::INFO => "INFO",
        Level::DEBUG => "DEBUG",
        Level::TRACE => "TRACE",
    }
}

/// Collects the message and `key=value` pairs of one event.
/// A `critical = true` field marks the line instead of being printed.
#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
    critical: bool,
}

impl LineVisitor {
    fn push_field(&mut self, name: &str, value: fmt::Arguments<'_>) {
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        let _ = write!(self.fields, "{name}={value}");
    }
}

impl Visit for LineVisitor {
    fn record_bool(&mut self, field: &Field, value: bool) {
        if field.name() == "critical" {
            self.critical = value;
        } else {
            self.push_field(field.name(), format_args!("{value}"));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.push_field(field.name(), format_args!("{value}"));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.push_field(field.name(), format_args!("{value:?}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    fn capture(buffer: &LogBuffer, f: impl FnOnce()) {
        let subscriber = tracing_subscriber::registry().with(buffer.layer());
        tracing::subscriber::with_default(subscriber, f);
    }

    #[test]
    fn test_ring_buffer_evicts_oldest() {
        let buffer = LogBuffer::new(3);
        for i in 0..5 {
            buffer.push(format!("line {i}"));
        }
        assert_eq!(buffer.lines(), vec!["line 2", "line 3", "line 4"]);
    }

    #[test]
    fn test_clear() {
        let buffer = LogBuffer::new(3);
        buffer.push("a".into());
        assert_eq!(buffer.clear(), 1);
        assert!(buffer.lines().is_empty());
    }

    #[test]
    fn test_layer_formats_events() {
        let buffer = LogBuffer::new(10);
        capture(&buffer, || {
            tracing::info!(origin = "doorbell", faces = 2, "recognition finished");
        });
        let lines = buffer.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("[INFO] recognition finished"), "{}", lines[0]);
        assert!(lines[0].contains("origin=doorbell"));
        assert!(lines[0].contains("faces=2"));
    }

    #[test]
    fn test_critical_marker() {
        let buffer = LogBuffer::new(10);
        capture(&buffer, || {
            tracing::error!(critical = true, "face set sync failed");
        });
        let line = &buffer.lines()[0];
        assert!(line.contains("[CRITICAL] face set sync failed"), "{line}");
        assert!(!line.contains("critical=true"));
    }

    #[test]
    fn test_save_and_restore() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs.json");

        let buffer = LogBuffer::new(3);
        buffer.push("old 1".into());
        buffer.push("old 2".into());
        buffer.save(&path).unwrap();

        let fresh = LogBuffer::new(3);
        fresh.push("new".into());
        assert_eq!(fresh.restore(&path).unwrap(), 2);
        assert_eq!(fresh.lines(), vec!["old 1", "old 2", "new"]);
    }

    #[test]
    fn test_restore_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = LogBuffer::new(3);
        assert_eq!(buffer.restore(&dir.path().join("absent.json")).unwrap(), 0);
    }
}
