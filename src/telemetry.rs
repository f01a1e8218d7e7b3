//! Outbound DogStatsD self-telemetry.
//!
//! Thin, best-effort UDP emitter for the server's own counters and timers
//! (`veneur.packet.*`, `veneur.flush.*`, `veneur.worker.*` — the names are a
//! wire contract with existing dashboards). Gracefully degrades to a no-op
//! if the stats endpoint cannot be reached at startup; send failures at
//! runtime are ignored.

use rand::Rng;
use std::net::UdpSocket;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[derive(Clone)]
pub struct Telemetry {
    socket: Arc<Option<UdpSocket>>,
    /// Sampling applied to `count_sampled` emissions.
    sample_rate: f64,
}

impl Telemetry {
    /// Binds an ephemeral socket connected to `stats_address`. On failure
    /// the client is created disabled rather than failing startup.
    pub fn new(stats_address: &str, sample_rate: f64) -> Self {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .and_then(|s| {
                s.connect(stats_address)?;
                s.set_nonblocking(true)?;
                Ok(s)
            })
            .map_err(|e| {
                warn!(
                    "self-telemetry to {} unavailable: {}. Internal metrics disabled.",
                    stats_address, e
                );
                e
            })
            .ok();
        Telemetry {
            socket: Arc::new(socket),
            sample_rate,
        }
    }

    /// No-op client for tests and for running without a local agent.
    pub fn disabled() -> Self {
        Telemetry {
            socket: Arc::new(None),
            sample_rate: 1.0,
        }
    }

    pub fn count(&self, name: &str, value: i64, tags: &[&str]) {
        self.send(name, &value.to_string(), "c", 1.0, tags);
    }

    /// Counter emission sampled at the configured telemetry rate; the line
    /// carries `|@rate` so the receiving end scales it back up.
    pub fn count_sampled(&self, name: &str, value: i64, tags: &[&str]) {
        let rate = self.sample_rate;
        if rate < 1.0 && rand::thread_rng().gen::<f64>() >= rate {
            return;
        }
        self.send(name, &value.to_string(), "c", rate, tags);
    }

    /// Duration as a histogram of nanoseconds.
    pub fn timing_ns(&self, name: &str, duration: Duration, tags: &[&str]) {
        self.send(name, &(duration.as_nanos() as u64).to_string(), "h", 1.0, tags);
    }

    fn send(&self, name: &str, value: &str, type_code: &str, rate: f64, tags: &[&str]) {
        let Some(socket) = self.socket.as_ref() else {
            return;
        };
        let mut line = String::with_capacity(name.len() + value.len() + 16);
        line.push_str(name);
        line.push(':');
        line.push_str(value);
        line.push('|');
        line.push_str(type_code);
        if rate < 1.0 {
            line.push_str("|@");
            line.push_str(&rate.to_string());
        }
        if !tags.is_empty() {
            line.push_str("|#");
            line.push_str(&tags.join(","));
        }
        // Best effort; a full socket buffer or missing agent is not an error
        // worth surfacing on the hot path.
        let _ = socket.send(line.as_bytes());
    }
}

impl std::fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Telemetry")
            .field("enabled", &self.socket.is_some())
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receiver() -> (UdpSocket, String) {
        let sock = UdpSocket::bind("127.0.0.1:0").unwrap();
        sock.set_read_timeout(Some(Duration::from_secs(1))).unwrap();
        let addr = sock.local_addr().unwrap().to_string();
        (sock, addr)
    }

    fn recv_line(sock: &UdpSocket) -> String {
        let mut buf = [0u8; 1024];
        let n = sock.recv(&mut buf).unwrap();
        String::from_utf8(buf[..n].to_vec()).unwrap()
    }

    #[test]
    fn formats_counter_lines() {
        let (sock, addr) = receiver();
        let t = Telemetry::new(&addr, 1.0);
        t.count("veneur.packet.error_total", 1, &[]);
        assert_eq!(recv_line(&sock), "veneur.packet.error_total:1|c");
    }

    #[test]
    fn formats_tags_and_histograms() {
        let (sock, addr) = receiver();
        let t = Telemetry::new(&addr, 1.0);
        t.timing_ns(
            "veneur.flush.worker_duration_ns",
            Duration::from_nanos(1500),
            &["worker:3"],
        );
        assert_eq!(
            recv_line(&sock),
            "veneur.flush.worker_duration_ns:1500|h|#worker:3"
        );
    }

    #[test]
    fn sampled_counts_carry_the_rate() {
        let (sock, addr) = receiver();
        let t = Telemetry::new(&addr, 1.0);
        // rate 1.0 never adds |@; exercise the tag via an explicit client.
        t.count_sampled("veneur.packet.received_total", 1, &[]);
        assert_eq!(recv_line(&sock), "veneur.packet.received_total:1|c");
    }

    #[test]
    fn disabled_client_is_silent() {
        Telemetry::disabled().count("anything", 1, &[]);
    }
}
