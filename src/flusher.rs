//! Periodic flush pipeline.
//!
//! Every tick: snapshot all workers in parallel (each bounded by a per-worker
//! timeout so one stuck shard cannot stall the interval), finalize the batch
//! (global tags, hostname, device extraction), then hand it to every sink.

use crate::metrics::OutputMetric;
use crate::sinks::Sink;
use crate::telemetry::Telemetry;
use crate::worker::WorkerHandle;
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

pub struct Flusher {
    workers: Arc<Vec<WorkerHandle>>,
    sinks: Vec<Box<dyn Sink>>,
    interval: Duration,
    /// Per-worker snapshot timeout; a slow worker's batch is skipped.
    flush_timeout: Duration,
    hostname: String,
    global_tags: Vec<String>,
    telemetry: Telemetry,
}

impl Flusher {
    pub fn new(
        workers: Arc<Vec<WorkerHandle>>,
        sinks: Vec<Box<dyn Sink>>,
        interval: Duration,
        flush_timeout: Duration,
        hostname: String,
        global_tags: Vec<String>,
        telemetry: Telemetry,
    ) -> Self {
        Flusher {
            workers,
            sinks,
            interval,
            flush_timeout,
            hostname,
            global_tags,
            telemetry,
        }
    }

    /// Ticks until shutdown, then runs one final flush so samples drained
    /// during shutdown still ship.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut tick = tokio::time::interval(self.interval);
        // interval() fires immediately; the first real flush happens one
        // full period after startup.
        tick.tick().await;
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.flush_once().await;
                }
                _ = shutdown.changed() => {
                    info!("final flush before shutdown");
                    self.flush_once().await;
                    break;
                }
            }
        }
    }

    /// One complete flush pass. Public so tests can drive ticks directly.
    pub async fn flush_once(&self) {
        let start = Instant::now();

        let snapshots = join_all(self.workers.iter().map(|worker| async move {
            tokio::time::timeout(self.flush_timeout, worker.flush()).await
        }))
        .await;

        let mut metrics = Vec::new();
        for (worker, snapshot) in self.workers.iter().zip(snapshots) {
            match snapshot {
                Ok(Some(batch)) => metrics.extend(batch),
                Ok(None) => warn!(worker = worker.id(), "worker gone, skipping its batch"),
                Err(_) => warn!(
                    worker = worker.id(),
                    "flush snapshot timed out, skipping its batch"
                ),
            }
        }

        for metric in &mut metrics {
            self.finalize(metric);
        }

        self.telemetry
            .count("veneur.flush.metrics_total", metrics.len() as i64, &[]);

        if metrics.is_empty() {
            debug!("nothing to flush this interval");
        } else {
            for sink in &self.sinks {
                if let Err(e) = sink.flush(&metrics).await {
                    error!(sink = sink.name(), "flush failed: {}", e);
                    self.telemetry.count("veneur.flush.error_total", 1, &[]);
                }
            }
            info!(metrics = metrics.len(), "flushed");
        }

        self.telemetry.timing_ns(
            "veneur.flush.transaction_duration_ns",
            start.elapsed(),
            &[],
        );
    }

    /// Attaches global tags and the server hostname, and pulls a `device:`
    /// tag into the device field. A client-supplied `host:` tag is left in
    /// place: global aggregation only controls the server's own host field.
    fn finalize(&self, metric: &mut OutputMetric) {
        if let Some(pos) = metric.tags.iter().position(|t| t.starts_with("device:")) {
            let tag = metric.tags.remove(pos);
            metric.device_name = tag["device:".len()..].to_string();
        }
        metric.tags.extend(self.global_tags.iter().cloned());
        metric.hostname = self.hostname.clone();
    }
}
