//! UDP ingest: receive datagrams, parse, route records to workers.
//!
//! Several listener tasks may share one socket to scale receive throughput;
//! the kernel serializes reads. Routing is `fingerprint % num_workers`, so a
//! given metric always lands on the same worker regardless of which listener
//! read it. The receive loop never blocks on a worker: a full queue drops
//! the record and counts it.

use crate::protocol::parse_datagram;
use crate::telemetry::Telemetry;
use crate::worker::WorkerHandle;
use bytes::BytesMut;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, error};

pub struct Listener {
    socket: Arc<UdpSocket>,
    workers: Arc<Vec<WorkerHandle>>,
    buffer_size: usize,
    telemetry: Telemetry,
}

impl Listener {
    pub fn new(
        socket: Arc<UdpSocket>,
        workers: Arc<Vec<WorkerHandle>>,
        buffer_size: usize,
        telemetry: Telemetry,
    ) -> Self {
        Listener {
            socket,
            workers,
            buffer_size,
            telemetry,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        // Datagrams longer than the buffer are truncated by the kernel at
        // receive time; the parser only ever sees at most buffer_size bytes.
        let mut buf = BytesMut::zeroed(self.buffer_size);
        loop {
            let received = tokio::select! {
                _ = shutdown.changed() => break,
                r = self.socket.recv_from(&mut buf[..]) => r,
            };
            match received {
                Ok((len, _peer)) => self.dispatch(&buf[..len]),
                Err(e) => {
                    error!("udp receive failed: {}", e);
                }
            }
        }
        debug!("listener stopped");
    }

    fn dispatch(&self, datagram: &[u8]) {
        self.telemetry
            .count_sampled("veneur.packet.received_total", 1, &[]);
        for parsed in parse_datagram(datagram) {
            match parsed {
                Ok(record) => {
                    let fingerprint = record.fingerprint();
                    let index = (fingerprint % self.workers.len() as u64) as usize;
                    if !self.workers[index].try_sample(fingerprint, record) {
                        let worker_tag = format!("worker:{}", index);
                        self.telemetry
                            .count("veneur.worker.dropped_total", 1, &[&worker_tag]);
                    }
                }
                Err(e) => {
                    debug!("dropping malformed record: {}", e);
                    self.telemetry.count("veneur.packet.error_total", 1, &[]);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregators::Aggregates;
    use crate::worker::{FlushSettings, Worker};
    use std::time::Duration;

    fn spawn_workers(n: usize) -> (Arc<Vec<WorkerHandle>>, Vec<tokio::task::JoinHandle<()>>) {
        let settings = FlushSettings {
            interval_secs: 10,
            percentiles: vec![],
            aggregates: Aggregates::default(),
            expiry: Duration::from_secs(300),
        };
        let mut handles = Vec::new();
        let mut tasks = Vec::new();
        for id in 0..n {
            let (worker, handle) = Worker::new(id, settings.clone(), Telemetry::disabled());
            tasks.push(tokio::spawn(worker.run()));
            handles.push(handle);
        }
        (Arc::new(handles), tasks)
    }

    #[tokio::test]
    async fn routes_datagrams_to_workers() {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let addr = socket.local_addr().unwrap();
        let (workers, _tasks) = spawn_workers(2);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let listener = Listener::new(socket, workers.clone(), 8192, Telemetry::disabled());
        let listener_task = tokio::spawn(listener.run(shutdown_rx));

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client
            .send_to(b"a.b.c:5|c\nnot a metric\nd.e.f:1|g\n", addr)
            .await
            .unwrap();

        // Both valid records should eventually land in a worker flush.
        let mut emitted = Vec::new();
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            emitted.clear();
            for w in workers.iter() {
                emitted.extend(w.flush().await.unwrap());
            }
            if emitted.iter().any(|m| m.name == "d.e.f") {
                break;
            }
        }
        assert!(emitted.iter().any(|m| m.name == "d.e.f"));

        shutdown_tx.send(true).unwrap();
        listener_task.await.unwrap();
    }

    #[tokio::test]
    async fn same_name_routes_to_same_worker() {
        // Pure routing check, no sockets: the fingerprint fully determines
        // the worker index.
        use crate::metrics::{fingerprint, MetricKind};
        let tags_a = vec!["foo:bar".to_string(), "baz:quz".to_string()];
        let tags_b = vec!["baz:quz".to_string(), "foo:bar".to_string()];
        let fp_a = fingerprint("a.b.c", MetricKind::Histogram, &tags_a);
        let fp_b = fingerprint("a.b.c", MetricKind::Histogram, &tags_b);
        for num_workers in [1u64, 2, 4, 16, 96] {
            assert_eq!(fp_a % num_workers, fp_b % num_workers);
        }
    }
}
