//! End-to-end: UDP datagrams in, aggregated series POSTed upstream.

use corral::{Config, Server};
use serde_json::Value;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct RunningServer {
    addr: SocketAddr,
    stop: oneshot::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl RunningServer {
    async fn shutdown(self) {
        let _ = self.stop.send(());
        self.task.await.unwrap();
    }
}

async fn start_server(api: &MockServer) -> RunningServer {
    let config = Config {
        api_hostname: api.uri(),
        key: "sekrit".to_string(),
        udp_address: "127.0.0.1:0".to_string(),
        num_workers: 2,
        interval: 1,
        hostname: "globalstats".to_string(),
        tags: vec!["region:test".to_string()],
        percentiles: vec![0.90],
        aggregates: ["max", "min", "sum", "avg", "count", "median"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        ..Config::default()
    };
    let server = Server::new(config).await.unwrap();
    let addr = server.local_addr().unwrap();
    let (stop, stopped) = oneshot::channel::<()>();
    let task = tokio::spawn(server.run_until(async move {
        let _ = stopped.await;
    }));
    RunningServer { addr, stop, task }
}

async fn mount_series_endpoint(api: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/v1/series"))
        .and(query_param("api_key", "sekrit"))
        .respond_with(ResponseTemplate::new(202))
        .mount(api)
        .await;
}

/// Polls the mock upstream until a POSTed body contains `metric_name`.
async fn await_series_with(api: &MockServer, metric_name: &str) -> Vec<Value> {
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        for request in api.received_requests().await.unwrap() {
            let body: Value = serde_json::from_slice(&request.body).unwrap();
            let series = body["series"].as_array().unwrap().clone();
            if series.iter().any(|m| m["metric"] == metric_name) {
                return series;
            }
        }
    }
    panic!("no flush containing {} observed", metric_name);
}

fn find<'a>(series: &'a [Value], name: &str) -> &'a Value {
    series
        .iter()
        .find(|m| m["metric"] == name)
        .unwrap_or_else(|| panic!("{} missing from series", name))
}

#[tokio::test]
async fn counters_gauges_and_sets_flush_upstream() {
    let api = MockServer::start().await;
    mount_series_endpoint(&api).await;
    let server = start_server(&api).await;

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client
        .send_to(b"e2e.counter:5|c|#foo:bar\ne2e.gauge:42|g\n", server.addr)
        .await
        .unwrap();
    client
        .send_to(b"e2e.set:5|s\ne2e.set:123|s\ne2e.set:5|s\n", server.addr)
        .await
        .unwrap();

    let series = await_series_with(&api, "e2e.counter").await;

    let counter = find(&series, "e2e.counter");
    assert_eq!(counter["type"], "rate");
    assert_eq!(counter["interval"], 1);
    assert_eq!(counter["points"][0][1], 5.0);
    assert_eq!(counter["host"], "globalstats");
    let tags: Vec<&str> = counter["tags"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t.as_str().unwrap())
        .collect();
    assert_eq!(tags, vec!["foo:bar", "region:test"]);

    let gauge = find(&series, "e2e.gauge");
    assert_eq!(gauge["type"], "gauge");
    assert_eq!(gauge["interval"], 0);
    assert_eq!(gauge["points"][0][1], 42.0);

    let set = find(&series, "e2e.set");
    assert_eq!(set["type"], "gauge");
    let estimate = set["points"][0][1].as_f64().unwrap();
    assert!((estimate - 2.0).abs() <= 1.0, "set estimate was {}", estimate);

    server.shutdown().await;
}

#[tokio::test]
async fn histograms_emit_the_full_aggregate_menu() {
    let api = MockServer::start().await;
    mount_series_endpoint(&api).await;
    let server = start_server(&api).await;

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client
        .send_to(
            b"e2e.hist:5|h\ne2e.hist:10|h\ne2e.hist:15|h\ne2e.hist:20|h\ne2e.hist:25|h\n",
            server.addr,
        )
        .await
        .unwrap();

    let series = await_series_with(&api, "e2e.hist.max").await;

    assert_eq!(find(&series, "e2e.hist.max")["points"][0][1], 25.0);
    assert_eq!(find(&series, "e2e.hist.min")["points"][0][1], 5.0);
    assert_eq!(find(&series, "e2e.hist.sum")["points"][0][1], 75.0);
    assert_eq!(find(&series, "e2e.hist.avg")["points"][0][1], 15.0);
    assert_eq!(find(&series, "e2e.hist.median")["points"][0][1], 15.0);
    assert_eq!(find(&series, "e2e.hist.90percentile")["points"][0][1], 23.75);

    let count = find(&series, "e2e.hist.count");
    assert_eq!(count["type"], "rate");
    assert_eq!(count["interval"], 1);
    // Five samples over a one second interval.
    assert_eq!(count["points"][0][1], 5.0);

    server.shutdown().await;
}

#[tokio::test]
async fn shutdown_runs_a_final_flush() {
    let api = MockServer::start().await;
    mount_series_endpoint(&api).await;
    let server = start_server(&api).await;

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client
        .send_to(b"e2e.final:7|c\n", server.addr)
        .await
        .unwrap();
    // Give the listener a beat to dequeue, then stop before the first
    // periodic flush would fire.
    tokio::time::sleep(Duration::from_millis(200)).await;
    server.shutdown().await;

    let mut seen = false;
    for request in api.received_requests().await.unwrap() {
        let body: Value = serde_json::from_slice(&request.body).unwrap();
        if body["series"]
            .as_array()
            .unwrap()
            .iter()
            .any(|m| m["metric"] == "e2e.final")
        {
            seen = true;
        }
    }
    assert!(seen, "final flush did not ship the pending counter");
}
