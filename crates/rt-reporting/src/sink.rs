//! The crash/event capture contract (§4.8-ambient): a `ReportSink` trait
//! with a no-op and an in-memory test implementation. The spec names a
//! vendor (Sentry) only through `sys_params.reporting.sentry_dsn`; no
//! vendor crate is wired in here; an integrator plugs one in by
//! implementing `ReportSink` and handing it to `Reporter::new`.

use std::collections::VecDeque;

use parking_lot::Mutex;
use rt_config::runtime_config::{ReportingConfig, ReportingLevel};

#[derive(Debug, Clone)]
pub struct ReportEvent {
    pub level: ReportingLevel,
    pub message: String,
    pub stack_trace: Option<String>,
}

/// Where captured events (and, optionally, gauges) ultimately go. Matches
/// the shape of the teacher's own `metrics`/`metrics-exporter-prometheus`
/// usage for the latter: `record_gauge` is a thin wrapper over
/// `metrics::gauge!` by default, overridable by a vendor sink that also
/// wants the raw event.
pub trait ReportSink: Send + Sync {
    fn capture(&self, event: &ReportEvent);

    fn record_gauge(&self, name: &'static str, value: f64) {
        metrics::gauge!(name).set(value);
    }
}

/// Drops every event; the default sink for local runs (`--telemetry-server`
/// absent).
pub struct NoopSink;

impl ReportSink for NoopSink {
    fn capture(&self, _event: &ReportEvent) {}
}

/// Retains every captured event in-process, for tests that assert on what
/// was reported.
#[derive(Default)]
pub struct InMemorySink {
    events: Mutex<Vec<ReportEvent>>,
}

impl InMemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn drain(&self) -> Vec<ReportEvent> {
        std::mem::take(&mut self.events.lock())
    }
}

impl ReportSink for InMemorySink {
    fn capture(&self, event: &ReportEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Filters events by `minimum_event_level`/`capture_logs`, retains a
/// bounded backlog sized by `send_queue_size` (dropping the oldest once
/// full — a real vendor sink drains it from a background thread; this
/// struct only bounds memory while nothing is draining it), and forwards
/// every accepted event to the configured sink immediately.
pub struct Reporter {
    sink: Box<dyn ReportSink>,
    config: ReportingConfig,
    backlog: Mutex<VecDeque<ReportEvent>>,
}

impl Reporter {
    #[must_use]
    pub fn new(config: ReportingConfig, sink: Box<dyn ReportSink>) -> Self {
        Self {
            sink,
            config,
            backlog: Mutex::new(VecDeque::new()),
        }
    }

    #[must_use]
    pub fn noop() -> Self {
        Self::new(ReportingConfig::default(), Box::new(NoopSink))
    }

    /// Records one event (§3's "reporting instance"), honoring
    /// `capture_logs` (informational levels are dropped outright when
    /// disabled) and `minimum_event_level`.
    pub fn capture(&self, level: ReportingLevel, message: impl Into<String>, stack_trace: Option<String>) {
        if !self.config.capture_logs && level_rank(level) < level_rank(ReportingLevel::Warning) {
            return;
        }
        if level_rank(level) < level_rank(self.config.minimum_event_level) {
            return;
        }
        let event = ReportEvent {
            level,
            message: message.into(),
            stack_trace,
        };
        let mut backlog = self.backlog.lock();
        if backlog.len() >= self.config.send_queue_size as usize {
            backlog.pop_front();
        }
        backlog.push_back(event.clone());
        drop(backlog);
        self.sink.capture(&event);
    }

    pub fn record_gauge(&self, name: &'static str, value: f64) {
        self.sink.record_gauge(name, value);
    }

    #[must_use]
    pub fn backlog_len(&self) -> usize {
        self.backlog.lock().len()
    }
}

/// `ReportingLevel` has no natural field ordering in `rt-config`, so
/// filtering ranks it explicitly here rather than deriving `PartialOrd`
/// onto a config type that otherwise has no use for comparison.
const fn level_rank(level: ReportingLevel) -> u8 {
    match level {
        ReportingLevel::Debug => 0,
        ReportingLevel::Info => 1,
        ReportingLevel::Warning => 2,
        ReportingLevel::Error => 3,
        ReportingLevel::Fatal => 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_below_minimum_level_are_dropped() {
        let mut config = ReportingConfig::default();
        config.minimum_event_level = ReportingLevel::Error;
        let sink = Box::new(InMemorySink::new());
        let reporter = Reporter::new(config, sink);
        reporter.capture(ReportingLevel::Warning, "ignored", None);
        assert_eq!(reporter.backlog_len(), 0);
    }

    #[test]
    fn accepted_events_reach_the_sink() {
        let config = ReportingConfig { minimum_event_level: ReportingLevel::Debug, ..ReportingConfig::default() };
        let sink = std::sync::Arc::new(InMemorySink::new());
        let reporter = Reporter::new(config, Box::new(InMemorySinkHandle(sink.clone())));
        reporter.capture(ReportingLevel::Fatal, "boom", Some("at foo.rs:1".to_string()));
        assert_eq!(sink.drain().len(), 1);
    }

    struct InMemorySinkHandle(std::sync::Arc<InMemorySink>);
    impl ReportSink for InMemorySinkHandle {
        fn capture(&self, event: &ReportEvent) {
            self.0.capture(event);
        }
    }

    #[test]
    fn backlog_drops_oldest_once_send_queue_size_is_exceeded() {
        let config = ReportingConfig {
            minimum_event_level: ReportingLevel::Debug,
            send_queue_size: 2,
            ..ReportingConfig::default()
        };
        let reporter = Reporter::new(config, Box::new(NoopSink));
        reporter.capture(ReportingLevel::Info, "one", None);
        reporter.capture(ReportingLevel::Info, "two", None);
        reporter.capture(ReportingLevel::Info, "three", None);
        assert_eq!(reporter.backlog_len(), 2);
    }
}
