//! Diagnostics sink passed explicitly to components that need to report
//! recoverable problems.
//!
//! Components never log through a process-global logger of their own; they
//! receive an `Arc<dyn Diagnostics>` at construction. The default sink
//! forwards to `tracing` as structured events.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Severity of a diagnostic entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        };
        f.write_str(s)
    }
}

/// A single reported event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub level: Level,
    /// Component that reported the entry, e.g. `"title"` or `"xsl"`.
    pub component: &'static str,
    /// Href of the resource concerned, if any.
    pub href: Option<String>,
    pub message: String,
}

/// Receiver for diagnostic events.
pub trait Diagnostics: Send + Sync {
    fn report(&self, level: Level, component: &'static str, href: Option<&str>, message: &str);

    fn debug(&self, component: &'static str, href: Option<&str>, message: &str) {
        self.report(Level::Debug, component, href, message);
    }

    fn warn(&self, component: &'static str, href: Option<&str>, message: &str) {
        self.report(Level::Warn, component, href, message);
    }

    fn error(&self, component: &'static str, href: Option<&str>, message: &str) {
        self.report(Level::Error, component, href, message);
    }
}

/// Forwards every entry to the matching `tracing` macro.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDiagnostics;

impl Diagnostics for TracingDiagnostics {
    fn report(&self, level: Level, component: &'static str, href: Option<&str>, message: &str) {
        let href = href.unwrap_or("");
        match level {
            Level::Debug => tracing::debug!(component, href, "{}", message),
            Level::Info => tracing::info!(component, href, "{}", message),
            Level::Warn => tracing::warn!(component, href, "{}", message),
            Level::Error => tracing::error!(component, href, "{}", message),
        }
    }
}

/// Collects entries in memory.
#[derive(Debug, Default)]
pub struct MemoryDiagnostics {
    entries: Mutex<Vec<Entry>>,
}

impl MemoryDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything reported so far.
    pub fn entries(&self) -> Vec<Entry> {
        self.entries.lock().clone()
    }

    /// Entries at or above `level`.
    pub fn at_least(&self, level: Level) -> Vec<Entry> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.level >= level)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl Diagnostics for MemoryDiagnostics {
    fn report(&self, level: Level, component: &'static str, href: Option<&str>, message: &str) {
        self.entries.lock().push(Entry {
            level,
            component,
            href: href.map(str::to_owned),
            message: message.to_owned(),
        });
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDiagnostics;

impl Diagnostics for NullDiagnostics {
    #[inline]
    fn report(&self, _: Level, _: &'static str, _: Option<&str>, _: &str) {}
}

/// The sink used when a constructor is not given one.
pub fn default_diagnostics() -> Arc<dyn Diagnostics> {
    Arc::new(TracingDiagnostics)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_diagnostics_collects() {
        let sink = MemoryDiagnostics::new();
        sink.debug("title", Some("a.xhtml"), "scanning");
        sink.warn("title", Some("a.xhtml"), "read failed");
        sink.error("xsl", None, "boom");

        assert_eq!(sink.len(), 3);
        let serious = sink.at_least(Level::Warn);
        assert_eq!(serious.len(), 2);
        assert_eq!(serious[0].href.as_deref(), Some("a.xhtml"));
        assert_eq!(serious[1].component, "xsl");

        sink.clear();
        assert!(sink.is_empty());
    }

    #[test]
    fn test_sinks_are_object_safe() {
        let sinks: Vec<Arc<dyn Diagnostics>> = vec![
            default_diagnostics(),
            Arc::new(NullDiagnostics),
            Arc::new(MemoryDiagnostics::new()),
        ];
        for sink in &sinks {
            sink.warn("test", None, "ignored or forwarded");
        }
    }
}
