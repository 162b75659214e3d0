//! Fan-out of snapshots and lifecycle calls to sinks.
//!
//! Every enabled sink gets its own task per call, so an error or a panic in
//! one sink is caught at the join and never reaches its siblings or the loop.

use crate::sink::Sink;
use crate::snapshot::Snapshot;
use futures::future::join_all;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info};

pub struct Dispatcher {
    sinks: Vec<Arc<dyn Sink>>,
}

impl Dispatcher {
    pub fn new(sinks: Vec<Arc<dyn Sink>>) -> Self {
        Self { sinks }
    }

    pub fn enabled_count(&self) -> usize {
        self.sinks.iter().filter(|sink| sink.enabled()).count()
    }

    /// Deliver one snapshot to every enabled sink and wait for all of them.
    pub async fn fanout(&self, snapshot: Arc<Snapshot>) {
        self.for_each_enabled("consume", move |sink| {
            let snapshot = Arc::clone(&snapshot);
            async move { sink.consume(&snapshot).await }
        })
        .await;
    }

    pub async fn initialize_all(&self) {
        self.for_each_enabled("initialize", |sink| async move { sink.initialize().await })
            .await;
    }

    pub async fn shutdown_all(&self) {
        self.for_each_enabled("shutdown", |sink| async move { sink.shutdown().await })
            .await;
    }

    async fn for_each_enabled<F, Fut, E>(&self, stage: &'static str, op: F)
    where
        F: Fn(Arc<dyn Sink>) -> Fut,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let (names, tasks): (Vec<String>, Vec<_>) = self
            .sinks
            .iter()
            .filter(|sink| sink.enabled())
            .map(|sink| (sink.name().to_string(), tokio::spawn(op(Arc::clone(sink)))))
            .unzip();

        if tasks.is_empty() {
            debug!(stage, "no enabled sinks");
            return;
        }

        for (name, result) in names.iter().zip(join_all(tasks).await) {
            match result {
                Ok(Ok(())) if stage == "consume" => debug!(sink = %name, stage, "sink finished"),
                Ok(Ok(())) => info!(sink = %name, stage, "sink finished"),
                Ok(Err(e)) => error!(sink = %name, stage, error = %e, "sink failed"),
                Err(e) if e.is_panic() => error!(sink = %name, stage, "sink panicked"),
                Err(e) => error!(sink = %name, stage, error = %e, "sink task did not complete"),
            }
        }
    }
}
