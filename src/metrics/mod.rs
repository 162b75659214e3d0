//! Platform-abstracted metrics sampling.
//!
//! [`select_source`] picks the implementation for the running platform once
//! at startup. Only Linux is implemented; everything else gets an explicit
//! [`SourceSelection::Unsupported`].

#[cfg(target_os = "linux")]
pub mod cpu;
#[cfg(target_os = "linux")]
pub mod disk;
#[cfg(target_os = "linux")]
pub mod linux;
#[cfg(target_os = "linux")]
pub mod memory;

use crate::config::MonitoringSettings;
use crate::snapshot::Snapshot;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SamplerError {
    /// Native counters could not be opened; the source is unusable
    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),

    /// No sampler exists for this operating system
    #[error("system monitoring is not implemented for {0}")]
    NotImplemented(&'static str),

    /// A sub-measurement failed on a supported source; transient
    #[error("failed to sample {metric}: {source}")]
    SamplingFailure {
        metric: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl SamplerError {
    pub(crate) fn failure(metric: &'static str) -> impl FnOnce(anyhow::Error) -> Self {
        move |err| SamplerError::SamplingFailure {
            metric,
            source: err.into(),
        }
    }
}

/// Produces snapshots on demand
pub trait MetricsSource: Send {
    fn is_supported(&self) -> bool;

    fn sample(&mut self) -> Result<Snapshot, SamplerError>;
}

/// Outcome of platform selection, checked by the caller
pub enum SourceSelection {
    Supported(Box<dyn MetricsSource>),
    Unsupported(SamplerError),
}

impl SourceSelection {
    pub fn into_result(self) -> Result<Box<dyn MetricsSource>, SamplerError> {
        match self {
            SourceSelection::Supported(source) => Ok(source),
            SourceSelection::Unsupported(reason) => Err(reason),
        }
    }
}

/// Build the sampler for the running platform.
///
/// Blocks for the CPU settling delay on success.
pub fn select_source(settings: &MonitoringSettings) -> SourceSelection {
    #[cfg(target_os = "linux")]
    {
        match linux::LinuxMetricsSource::new(settings.cpu_settle_delay(), &settings.disk_path) {
            Ok(source) => SourceSelection::Supported(Box::new(source)),
            Err(err) => SourceSelection::Unsupported(err),
        }
    }

    #[cfg(not(target_os = "linux"))]
    {
        let _ = settings;
        SourceSelection::Unsupported(SamplerError::NotImplemented(std::env::consts::OS))
    }
}
