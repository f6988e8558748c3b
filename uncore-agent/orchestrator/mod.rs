pub mod collector;

pub use collector::{CollectorConfig, CounterCollector};
