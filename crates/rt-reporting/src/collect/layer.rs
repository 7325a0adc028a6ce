//! A `tracing_subscriber::Layer` that forwards every span and event to one
//! `Collector`. Simplified from `promptkit-trace`'s `CollectorLayer`: the
//! teacher's version lets each span opt a fresh collector in lazily via
//! `Span::collect_into`, supporting multiple independently-sampled
//! sub-trees per process. This runtime only ever wants one active
//! reporting sink for its whole process lifetime, so the collector is
//! fixed at layer construction instead.

use fastant::{Anchor, Instant};
use tracing::span::{Attributes, Id};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

use super::collector::{Collector, EventRecord, FieldFilter, SpanRecord};
use super::visit::FieldVisitor;

struct SpanState {
    span_id: u64,
    begin: Instant,
    record: SpanRecord,
}

pub struct CollectorLayer<C> {
    collector: C,
    target: &'static str,
    level: tracing::level_filters::LevelFilter,
    field_filter: Option<FieldFilter>,
    anchor: Anchor,
}

impl<C: Collector> CollectorLayer<C> {
    pub fn new(collector: C, target: &'static str, level: tracing::level_filters::LevelFilter) -> Self {
        Self {
            field_filter: C::field_filter(),
            collector,
            target,
            level,
            anchor: Anchor::new(),
        }
    }

    fn enabled(&self, metadata: &tracing::Metadata<'_>) -> bool {
        *metadata.level() <= self.level && metadata.target() == self.target
    }

    fn visit_into(&self, properties: &mut Vec<(&'static str, String)>, record: impl FnOnce(&mut dyn tracing::field::Visit)) {
        if let Some(filter) = &self.field_filter {
            record(&mut FieldVisitor::new(|name| filter.enabled(name), |name, value| properties.push((name, value))));
        } else {
            record(&mut FieldVisitor::new(|_| true, |name, value| properties.push((name, value))));
        }
    }
}

impl<S, C> Layer<S> for CollectorLayer<C>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    C: Collector,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        if !self.enabled(attrs.metadata()) {
            return;
        }
        let span = ctx.span(id).expect("span must exist in registry");
        let parent_id = span
            .parent()
            .and_then(|p| p.extensions().get::<SpanState>().map(|s| s.span_id))
            .unwrap_or(0);

        let mut record = SpanRecord {
            span_id: self.collector.next_id(),
            parent_id,
            begin_time_unix_ns: Instant::now().as_unix_nanos(&self.anchor),
            duration_ns: 0,
            name: attrs.metadata().name(),
            properties: Vec::new(),
        };
        self.visit_into(&mut record.properties, |visitor| attrs.values().record(visitor));
        self.collector.collect_span_start(record.clone());

        span.extensions_mut().insert(SpanState {
            span_id: record.span_id,
            begin: Instant::now(),
            record,
        });
    }

    fn on_close(&self, id: Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(&id) else { return };
        let Some(state) = span.extensions_mut().remove::<SpanState>() else {
            return;
        };
        let mut record = state.record;
        record.duration_ns = state.begin.elapsed().as_nanos().try_into().unwrap_or(u64::MAX);
        self.collector.collect_span_end(record);
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        if !self.enabled(event.metadata()) {
            return;
        }
        let parent_span_id = ctx
            .event_span(event)
            .and_then(|s| s.extensions().get::<SpanState>().map(|st| st.span_id))
            .unwrap_or(0);

        let mut record = EventRecord {
            parent_span_id,
            name: event.metadata().name(),
            timestamp_unix_ns: Instant::now().as_unix_nanos(&self.anchor),
            properties: Vec::new(),
        };
        self.visit_into(&mut record.properties, |visitor| event.record(visitor));
        self.collector.collect_event(record);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use tracing::{info, info_span};
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::Registry;

    use super::*;

    #[derive(Clone)]
    struct VecCollector(Arc<Mutex<(Vec<SpanRecord>, Vec<EventRecord>)>>);

    impl Collector for VecCollector {
        fn collect_span_start(&self, _span: SpanRecord) {}

        fn collect_span_end(&self, span: SpanRecord) {
            self.0.lock().unwrap().0.push(span);
        }

        fn collect_event(&self, event: EventRecord) {
            self.0.lock().unwrap().1.push(event);
        }
    }

    #[test]
    fn span_and_event_reach_the_collector() {
        let collected = Arc::new(Mutex::new((Vec::new(), Vec::new())));
        let layer = CollectorLayer::new(VecCollector(collected.clone()), "rt_reporting_test", tracing::level_filters::LevelFilter::INFO);
        let subscriber = Registry::default().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            let span = info_span!(target: "rt_reporting_test", "frame");
            let _enter = span.enter();
            info!(target: "rt_reporting_test", "hello");
        });

        let (spans, events) = &*collected.lock().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(events.len(), 1);
    }
}
