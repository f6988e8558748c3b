pub mod common;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod prom;
pub mod uncore;

pub use config::{AgentConfig, EventSpec};
pub use error::{Result, UncoreError};
pub use orchestrator::{CollectorConfig, CounterCollector};
pub use prom::CounterExporter;
pub use uncore::{select_platform, BoxHandle, Event, PlatformId, PlatformProfile, Uncore};
