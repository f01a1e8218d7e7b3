//! Core metric types shared across the ingest and flush paths.
//!
//! A [`SampleRecord`] is one parsed DogStatsD record on its way to a worker.
//! An [`OutputMetric`] is one flush-ready series entry in the shape the
//! upstream `/api/v1/series` endpoint expects.

use fnv::FnvHasher;
use serde::Serialize;
use std::hash::Hasher;

/// The four ingest metric types of the DogStatsD grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
    Set,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
            MetricKind::Set => "set",
        }
    }
}

/// Sample payload: numeric for counters/gauges/histograms, opaque text for
/// sets (set members are never parsed as numbers).
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Number(f64),
    Text(String),
}

/// One parsed DogStatsD record.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRecord {
    pub name: String,
    pub value: MetricValue,
    pub kind: MetricKind,
    /// Client-declared transmission probability in (0, 1].
    pub sample_rate: f64,
    /// Tags in the order the client sent them.
    pub tags: Vec<String>,
}

impl SampleRecord {
    /// Stable identity of this metric within the global name space.
    pub fn fingerprint(&self) -> u64 {
        fingerprint(&self.name, self.kind, &self.tags)
    }
}

/// Stable 64-bit FNV-1a digest of (name, type, sorted tags).
///
/// Tags are sorted before hashing so clients submitting the same tag set in
/// different orders collide into the same aggregator on the same worker.
pub fn fingerprint(name: &str, kind: MetricKind, tags: &[String]) -> u64 {
    let mut sorted: Vec<&str> = tags.iter().map(String::as_str).collect();
    sorted.sort_unstable();

    let mut hasher = FnvHasher::default();
    hasher.write(name.as_bytes());
    hasher.write_u8(0);
    hasher.write(kind.as_str().as_bytes());
    for tag in sorted {
        hasher.write_u8(0);
        hasher.write(tag.as_bytes());
    }
    hasher.finish()
}

/// Output series type. Aggregators only ever emit `Gauge` and `Rate`;
/// `Counter` exists so sinks that post-process raw series can rewrite it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Gauge,
    Rate,
    Counter,
}

impl OutputKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputKind::Gauge => "gauge",
            OutputKind::Rate => "rate",
            OutputKind::Counter => "counter",
        }
    }
}

/// One flush-ready metric, serializable as a `/api/v1/series` entry.
#[derive(Debug, Clone, Serialize)]
pub struct OutputMetric {
    #[serde(rename = "metric")]
    pub name: String,
    /// Single (unix seconds, value) pair.
    pub points: [(i64, f64); 1],
    pub tags: Vec<String>,
    /// Aggregation server hostname; empty when host attribution is disabled.
    #[serde(rename = "host")]
    pub hostname: String,
    #[serde(rename = "type")]
    pub kind: OutputKind,
    /// Seconds covered by a rate-typed value; 0 for gauges.
    pub interval: u64,
    /// Extracted from a `device:` tag at flush time, consumed by the CSV sink.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub device_name: String,
}

impl OutputMetric {
    pub fn gauge(name: String, tags: Vec<String>, timestamp: i64, value: f64) -> Self {
        OutputMetric {
            name,
            points: [(timestamp, value)],
            tags,
            hostname: String::new(),
            kind: OutputKind::Gauge,
            interval: 0,
            device_name: String::new(),
        }
    }

    pub fn rate(
        name: String,
        tags: Vec<String>,
        timestamp: i64,
        value: f64,
        interval: u64,
    ) -> Self {
        OutputMetric {
            name,
            points: [(timestamp, value)],
            tags,
            hostname: String::new(),
            kind: OutputKind::Rate,
            interval,
            device_name: String::new(),
        }
    }

    pub fn value(&self) -> f64 {
        self.points[0].1
    }

    pub fn timestamp(&self) -> i64 {
        self.points[0].0
    }
}
