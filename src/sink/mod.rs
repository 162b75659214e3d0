//! Snapshot consumers.
//!
//! Every sink decides once, at construction, whether it is enabled. The
//! dispatcher only ever calls enabled sinks, and errors returned from any
//! lifecycle method are logged there instead of being propagated.

pub mod log;
pub mod remote;

pub use self::log::LogSink;
pub use self::remote::{DeliveryFailure, DeliveryOutcome, DeliveryState, HttpTransport, RemoteSink, RetryPolicy, Transport};

use crate::config::Config;
use crate::snapshot::Snapshot;
use async_trait::async_trait;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InitError {
    #[error("cannot prepare {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ConsumeError {
    #[error("cannot write to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ShutdownError {
    #[error("cannot finalize {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[async_trait]
pub trait Sink: Send + Sync {
    fn name(&self) -> &str;

    fn enabled(&self) -> bool;

    async fn initialize(&self) -> Result<(), InitError>;

    async fn consume(&self, snapshot: &Snapshot) -> Result<(), ConsumeError>;

    async fn shutdown(&self) -> Result<(), ShutdownError>;
}

/// Build the configured sinks in dispatch order: log first, then remote.
pub fn build_sinks(config: &Config) -> Vec<Arc<dyn Sink>> {
    vec![
        Arc::new(LogSink::from_config(config)) as Arc<dyn Sink>,
        Arc::new(RemoteSink::from_config(config)),
    ]
}
