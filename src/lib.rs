//! Host resource monitor.
//!
//! Samples CPU, memory and disk utilization at a fixed interval and fans
//! every sample out to independently configured sinks: an append-only log
//! file and a retrying HTTP poster. A failing sink never stops collection.

pub mod collector;
pub mod config;
pub mod dispatch;
pub mod metrics;
pub mod sink;
pub mod snapshot;

pub use collector::{CollectionLoop, LoopState, RunSummary};
pub use config::{Config, ConfigError, ConfigLoader};
pub use dispatch::Dispatcher;
pub use metrics::{select_source, MetricsSource, SamplerError, SourceSelection};
pub use sink::{build_sinks, Sink};
pub use snapshot::{Payload, Snapshot, Usage};
