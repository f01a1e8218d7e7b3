//! Composition root: binds the ingest socket, spawns the worker pool,
//! listeners, and flusher, and coordinates graceful shutdown.

use crate::config::{Config, ConfigError};
use crate::flusher::Flusher;
use crate::listener::Listener;
use crate::sinks::{CsvSink, DatadogSink, Sink, SinkError};
use crate::telemetry::Telemetry;
use crate::worker::{FlushSettings, Worker, WorkerHandle};
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Hard bound on the drain + final flush during shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
    #[error(transparent)]
    Sink(#[from] SinkError),
}

pub struct Server {
    config: Config,
    socket: Arc<UdpSocket>,
    workers: Arc<Vec<WorkerHandle>>,
    worker_tasks: Vec<JoinHandle<()>>,
    telemetry: Telemetry,
    sinks: Vec<Box<dyn Sink>>,
}

impl Server {
    /// Validates config, binds the ingest socket, and spawns the worker
    /// pool. Listeners and the flusher start in [`Server::run`].
    pub async fn new(config: Config) -> Result<Server, ServerError> {
        config.validate()?;

        let socket = UdpSocket::bind(&config.udp_address)
            .await
            .map_err(|source| ServerError::Bind {
                addr: config.udp_address.clone(),
                source,
            })?;

        let telemetry = Telemetry::new(&config.stats_address, config.sample_rate);

        let settings = FlushSettings {
            interval_secs: config.interval,
            percentiles: config.percentiles.clone(),
            aggregates: config.histogram_aggregates(),
            expiry: Duration::from_secs(config.expiry),
        };
        let mut workers = Vec::with_capacity(config.num_workers);
        let mut worker_tasks = Vec::with_capacity(config.num_workers);
        for id in 0..config.num_workers {
            let (worker, handle) = Worker::new(id, settings.clone(), telemetry.clone());
            worker_tasks.push(tokio::spawn(worker.run()));
            workers.push(handle);
        }

        let mut sinks: Vec<Box<dyn Sink>> = Vec::new();
        if config.api_hostname.is_empty() {
            warn!("api_hostname not set, upstream flush disabled");
        } else {
            sinks.push(Box::new(DatadogSink::new(&config.api_hostname, &config.key)?));
        }
        if !config.flush_file.is_empty() {
            sinks.push(Box::new(CsvSink::new(
                PathBuf::from(&config.flush_file),
                config.hostname.clone(),
            )));
        }

        info!(
            workers = config.num_workers,
            readers = config.num_readers,
            interval = config.interval,
            "aggregation pool ready"
        );

        Ok(Server {
            config,
            socket: Arc::new(socket),
            workers: Arc::new(workers),
            worker_tasks,
            telemetry,
            sinks,
        })
    }

    /// Bound ingest address; useful when the config asked for port 0.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Serves until ctrl-c.
    pub async fn run(self) {
        self.run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
    }

    /// Serves until `shutdown` resolves, then drains: listeners stop,
    /// workers consume their queues, one final flush ships, and the whole
    /// teardown is bounded by a hard timeout.
    pub async fn run_until<F: Future<Output = ()>>(self, shutdown: F) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut listener_tasks = Vec::with_capacity(self.config.num_readers);
        for _ in 0..self.config.num_readers {
            let listener = Listener::new(
                self.socket.clone(),
                self.workers.clone(),
                self.config.buffer_size,
                self.telemetry.clone(),
            );
            listener_tasks.push(tokio::spawn(listener.run(shutdown_rx.clone())));
        }

        let flusher = Flusher::new(
            self.workers.clone(),
            self.sinks,
            Duration::from_secs(self.config.interval),
            Duration::from_millis(self.config.flush_timeout),
            self.config.hostname.clone(),
            self.config.tags.clone(),
            self.telemetry.clone(),
        );
        let flusher_task = tokio::spawn(flusher.run(shutdown_rx));

        info!(addr = %self.config.udp_address, "listening for DogStatsD datagrams");
        shutdown.await;
        info!("shutdown requested");

        let _ = shutdown_tx.send(true);
        let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
            for task in listener_tasks {
                let _ = task.await;
            }
            let _ = flusher_task.await;
        })
        .await;
        if drained.is_err() {
            warn!("shutdown drain exceeded {:?}, exiting anyway", SHUTDOWN_TIMEOUT);
        }

        // All handle clones are gone once the listeners and flusher stop;
        // dropping ours closes the worker queues.
        drop(self.workers);
        let _ = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
            for task in self.worker_tasks {
                let _ = task.await;
            }
        })
        .await;
        info!("shutdown complete");
    }
}
