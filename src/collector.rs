//! Fixed-interval collection loop.
//!
//! The loop owns the sampling cadence. It initializes the sinks, then ticks
//! until the cancellation token fires, then shuts the sinks down. A tick
//! samples, optionally echoes to stdout, fans the snapshot out and sleeps
//! for the interval; a failed sample sleeps a fixed fallback delay instead.

use crate::config::MonitoringSettings;
use crate::dispatch::Dispatcher;
use crate::metrics::MetricsSource;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Pause before retrying a tick whose sample failed
pub const SAMPLING_RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Stopped,
}

/// What a finished run did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub state: LoopState,
    /// Snapshots sampled and dispatched
    pub ticks: u64,
    pub sampling_failures: u64,
}

pub struct CollectionLoop {
    source: Box<dyn MetricsSource>,
    dispatcher: Dispatcher,
    interval: Duration,
    echo: bool,
}

impl CollectionLoop {
    pub fn new(source: Box<dyn MetricsSource>, dispatcher: Dispatcher, settings: &MonitoringSettings) -> Self {
        Self {
            source,
            dispatcher,
            interval: settings.interval(),
            echo: settings.enable_console_output,
        }
    }

    /// Run until `cancel` fires, then shut every enabled sink down.
    pub async fn run(mut self, cancel: CancellationToken) -> RunSummary {
        info!(
            interval_secs = self.interval.as_secs_f64(),
            enabled_sinks = self.dispatcher.enabled_count(),
            "starting collection loop"
        );
        self.dispatcher.initialize_all().await;

        let mut summary = RunSummary {
            state: LoopState::Running,
            ticks: 0,
            sampling_failures: 0,
        };
        while summary.state == LoopState::Running {
            summary.state = self.tick(&cancel, &mut summary).await;
        }

        info!(ticks = summary.ticks, "collection loop stopped; shutting down sinks");
        self.dispatcher.shutdown_all().await;
        summary
    }

    async fn tick(&mut self, cancel: &CancellationToken, summary: &mut RunSummary) -> LoopState {
        if cancel.is_cancelled() {
            return LoopState::Stopped;
        }

        let pause = match self.source.sample() {
            Ok(snapshot) => {
                if self.echo {
                    println!("{snapshot}");
                }
                self.dispatcher.fanout(Arc::new(snapshot)).await;
                summary.ticks += 1;
                self.interval
            }
            Err(e) => {
                summary.sampling_failures += 1;
                error!(error = %e, retry_in_secs = SAMPLING_RETRY_DELAY.as_secs(), "sampling failed");
                SAMPLING_RETRY_DELAY
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => LoopState::Stopped,
            _ = tokio::time::sleep(pause) => LoopState::Running,
        }
    }
}
