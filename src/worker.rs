//! Aggregation worker: single consumer of one shard of the metric space.
//!
//! Each worker owns four fingerprint-keyed maps (one per metric type) and is
//! the only task that ever touches them, so the sample path needs no locks.
//! Flush requests travel through the same queue as samples, which means a
//! flush snapshot captures exactly the samples dequeued before it and
//! nothing that arrives mid-flush.

use crate::aggregators::{Aggregates, Counter, FlushContext, Gauge, Histogram, Set};
use crate::metrics::{MetricKind, MetricValue, OutputMetric, SampleRecord};
use crate::telemetry::Telemetry;
use ahash::AHashMap;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

/// Inbound queue depth per worker. Samples beyond this are dropped by the
/// dispatcher rather than blocking the UDP receive loop.
pub const QUEUE_DEPTH: usize = 4096;

#[derive(Debug)]
pub enum WorkerMessage {
    Sample {
        fingerprint: u64,
        record: SampleRecord,
    },
    Flush {
        reply: oneshot::Sender<Vec<OutputMetric>>,
    },
    /// Panic injection for supervision tests.
    #[cfg(test)]
    Panic,
}

/// Flush-time settings a worker is constructed with.
#[derive(Debug, Clone)]
pub struct FlushSettings {
    pub interval_secs: u64,
    pub percentiles: Vec<f64>,
    pub aggregates: Aggregates,
    /// Aggregators idle longer than this are evicted during flush.
    pub expiry: Duration,
}

struct Tracked<T> {
    agg: T,
    last_sample: Instant,
}

impl<T> Tracked<T> {
    fn new(agg: T) -> Self {
        Tracked {
            agg,
            last_sample: Instant::now(),
        }
    }
}

pub struct Worker {
    id: usize,
    rx: mpsc::Receiver<WorkerMessage>,
    settings: FlushSettings,
    telemetry: Telemetry,
    counters: AHashMap<u64, Tracked<Counter>>,
    gauges: AHashMap<u64, Tracked<Gauge>>,
    sets: AHashMap<u64, Tracked<Set>>,
    histograms: AHashMap<u64, Tracked<Histogram>>,
}

/// Cheap cloneable sender side of a worker's queue.
#[derive(Clone)]
pub struct WorkerHandle {
    id: usize,
    tx: mpsc::Sender<WorkerMessage>,
}

impl WorkerHandle {
    pub fn id(&self) -> usize {
        self.id
    }

    /// Non-blocking enqueue; `false` means the queue was full (or the worker
    /// is gone) and the record was dropped.
    pub fn try_sample(&self, fingerprint: u64, record: SampleRecord) -> bool {
        self.tx
            .try_send(WorkerMessage::Sample { fingerprint, record })
            .is_ok()
    }

    /// Requests a flush snapshot. Unlike samples this waits for queue space:
    /// a flush must never be dropped.
    pub async fn flush(&self) -> Option<Vec<OutputMetric>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(WorkerMessage::Flush { reply }).await.ok()?;
        rx.await.ok()
    }
}

impl Worker {
    /// Creates the worker and its handle. Call [`Worker::run`] on a spawned
    /// task to start consuming.
    pub fn new(
        id: usize,
        settings: FlushSettings,
        telemetry: Telemetry,
    ) -> (Worker, WorkerHandle) {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let worker = Worker {
            id,
            rx,
            settings,
            telemetry,
            counters: AHashMap::new(),
            gauges: AHashMap::new(),
            sets: AHashMap::new(),
            histograms: AHashMap::new(),
        };
        (worker, WorkerHandle { id, tx })
    }

    pub async fn run(mut self) {
        let worker_tag = format!("worker:{}", self.id);
        while let Some(msg) = self.rx.recv().await {
            // A poisoned sample must not take down the shard; the supervisor
            // contract is that the process outlives any worker panic.
            if panic::catch_unwind(AssertUnwindSafe(|| self.handle(msg))).is_err() {
                error!(worker = self.id, "worker recovered from panic");
                self.telemetry
                    .count("veneur.worker.panic_total", 1, &[&worker_tag]);
            }
        }
        debug!(worker = self.id, "worker queue closed, exiting");
    }

    fn handle(&mut self, msg: WorkerMessage) {
        match msg {
            WorkerMessage::Sample { fingerprint, record } => {
                self.process_metric(fingerprint, record)
            }
            WorkerMessage::Flush { reply } => {
                let batch = self.flush();
                let _ = reply.send(batch);
            }
            #[cfg(test)]
            WorkerMessage::Panic => panic!("injected worker panic"),
        }
    }

    /// Looks up or creates the aggregator for the record's fingerprint and
    /// applies the sample.
    pub fn process_metric(&mut self, fingerprint: u64, record: SampleRecord) {
        let SampleRecord {
            name,
            value,
            kind,
            sample_rate,
            tags,
        } = record;
        match (kind, value) {
            (MetricKind::Counter, MetricValue::Number(v)) => {
                let entry = self
                    .counters
                    .entry(fingerprint)
                    .or_insert_with(|| Tracked::new(Counter::new(name, tags)));
                entry.agg.sample(v, sample_rate);
                entry.last_sample = Instant::now();
            }
            (MetricKind::Gauge, MetricValue::Number(v)) => {
                let entry = self
                    .gauges
                    .entry(fingerprint)
                    .or_insert_with(|| Tracked::new(Gauge::new(name, tags)));
                entry.agg.sample(v, sample_rate);
                entry.last_sample = Instant::now();
            }
            (MetricKind::Histogram, MetricValue::Number(v)) => {
                let entry = self
                    .histograms
                    .entry(fingerprint)
                    .or_insert_with(|| Tracked::new(Histogram::new(name, tags)));
                entry.agg.sample(v, sample_rate);
                entry.last_sample = Instant::now();
            }
            (MetricKind::Set, MetricValue::Text(member)) => {
                let entry = self
                    .sets
                    .entry(fingerprint)
                    .or_insert_with(|| Tracked::new(Set::new(name, tags)));
                entry.agg.sample(&member);
                entry.last_sample = Instant::now();
            }
            (kind, value) => {
                // The parser never produces these shapes.
                debug!(?kind, ?value, "dropping record with mismatched value shape");
            }
        }
    }

    /// Drains every aggregator into a flush batch.
    ///
    /// Counters are consumed outright (they reappear on the next sample),
    /// histograms reset their per-interval stats, gauges and sets re-emit
    /// their retained state. Idle aggregators past expiry are evicted.
    pub fn flush(&mut self) -> Vec<OutputMetric> {
        let start = Instant::now();
        let ctx = FlushContext {
            interval_secs: self.settings.interval_secs,
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs() as i64,
            percentiles: &self.settings.percentiles,
            aggregates: self.settings.aggregates,
        };

        let mut out = Vec::new();
        for (_, tracked) in self.counters.drain() {
            out.extend(tracked.agg.flush(&ctx));
        }
        for tracked in self.gauges.values() {
            out.extend(tracked.agg.flush(&ctx));
        }
        for tracked in self.sets.values() {
            out.extend(tracked.agg.flush(&ctx));
        }
        for tracked in self.histograms.values_mut() {
            out.extend(tracked.agg.flush(&ctx));
        }

        self.expire(Instant::now());

        let worker_tag = format!("worker:{}", self.id);
        self.telemetry.timing_ns(
            "veneur.flush.worker_duration_ns",
            start.elapsed(),
            &[&worker_tag],
        );
        out
    }

    /// Evicts aggregators that have not sampled within the expiry window.
    pub fn expire(&mut self, now: Instant) {
        let expiry = self.settings.expiry;
        let live = |t: Instant| now.duration_since(t) < expiry;
        self.gauges.retain(|_, tracked| live(tracked.last_sample));
        self.sets.retain(|_, tracked| live(tracked.last_sample));
        self.histograms.retain(|_, tracked| live(tracked.last_sample));
    }
}
