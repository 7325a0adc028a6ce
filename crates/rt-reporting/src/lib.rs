//! Reporting/telemetry plumbing (§3 "reporting instance", §4.8-ambient):
//! a span/event collector satisfying the runtime's internal tracing needs
//! (`collect`, grounded on the teacher's `promptkit-trace`) plus a
//! `ReportSink` contract for crash/event capture that a vendor (Sentry or
//! similar) plugs into without this crate depending on one.

pub mod collect;
pub mod sink;

pub use collect::{Collector, CollectorLayer, EventRecord, FieldFilter, SpanRecord};
pub use sink::{InMemorySink, NoopSink, ReportEvent, ReportSink, Reporter};
