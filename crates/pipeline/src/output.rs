//! Line sinks for command and build output.

use deckhand_core::Masker;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    pub fn as_str(self) -> &'static str {
        match self {
            Stream::Stdout => "stdout",
            Stream::Stderr => "stderr",
        }
    }
}

/// Receives output one line at a time, attributed to a source such as
/// `deploy:2` or `build:api`.
pub trait OutputSink: Send + Sync {
    fn line(&self, source: &str, stream: Stream, line: &str);
}

/// Logs lines through tracing: stdout at info, stderr at warn.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl OutputSink for TracingSink {
    fn line(&self, source: &str, stream: Stream, line: &str) {
        let formatted = format!("  [{}:{}] {}", source, stream.as_str(), line);
        match stream {
            Stream::Stdout => info!("{}", formatted),
            Stream::Stderr => warn!("{}", formatted),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedLine {
    pub source: String,
    pub stream: Stream,
    pub line: String,
}

/// Keeps every line in memory.
#[derive(Debug, Default)]
pub struct CaptureSink {
    lines: Mutex<Vec<CapturedLine>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<CapturedLine> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    /// All captured lines joined with newlines.
    pub fn text(&self) -> String {
        self.lines()
            .into_iter()
            .map(|l| l.line)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl OutputSink for CaptureSink {
    fn line(&self, source: &str, stream: Stream, line: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(CapturedLine {
                source: source.to_string(),
                stream,
                line: line.to_string(),
            });
        }
    }
}

/// Masks every line before forwarding it.
#[derive(Clone)]
pub struct MaskingSink {
    inner: Arc<dyn OutputSink>,
    masker: Masker,
}

impl MaskingSink {
    pub fn new(inner: Arc<dyn OutputSink>, masker: Masker) -> Self {
        Self { inner, masker }
    }

    pub fn masker(&self) -> &Masker {
        &self.masker
    }
}

impl OutputSink for MaskingSink {
    fn line(&self, source: &str, stream: Stream, line: &str) {
        self.inner.line(source, stream, &self.masker.mask(line));
    }
}

/// Fans lines out to several sinks.
pub struct TeeSink {
    sinks: Vec<Arc<dyn OutputSink>>,
}

impl TeeSink {
    pub fn new(sinks: Vec<Arc<dyn OutputSink>>) -> Self {
        Self { sinks }
    }
}

impl OutputSink for TeeSink {
    fn line(&self, source: &str, stream: Stream, line: &str) {
        for sink in &self.sinks {
            sink.line(source, stream, line);
        }
    }
}
