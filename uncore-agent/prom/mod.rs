pub mod counters;

pub use counters::{CounterExporter, CounterMetric, CounterSource};
