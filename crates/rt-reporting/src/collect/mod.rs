mod collector;
mod layer;
mod visit;

pub use collector::{Collector, EventRecord, FieldFilter, SpanRecord};
pub use layer::CollectorLayer;
