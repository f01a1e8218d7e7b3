//! TSV flush sink: one tab-separated file per flush, suitable for bulk
//! loading into a warehouse.
//!
//! Row schema, in column order: Name, Tags, MetricType, Hostname,
//! VeneurHostname, DeviceName, Interval, Timestamp, Value, Partition.
//! Tags render as `{tag1,tag2,...}`. Counter rows are rewritten as rates
//! (`value / interval`). Partition is the flush time's UTC date `YYYYMMDD` —
//! samples collected just before midnight land in the next day's partition,
//! which downstream consumers tolerate.

use super::{Sink, SinkError};
use crate::metrics::{OutputKind, OutputMetric};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tracing::info;

/// 12-hour clock, matching the warehouse loader's expected layout.
pub const DEFAULT_TIME_FORMAT: &str = "%Y-%m-%d %I:%M:%S";

/// Encodes one metric as one TSV row.
///
/// `server_hostname` fills the VeneurHostname column (the aggregation
/// server's own identity, distinct from the metric's `host` field).
pub fn encode_tsv<W: Write>(
    metric: &OutputMetric,
    out: &mut W,
    server_hostname: &str,
    partition: &str,
    time_format: &str,
) -> std::io::Result<()> {
    let (kind, value) = match metric.kind {
        // Raw counters become per-second rates on disk.
        OutputKind::Counter => (OutputKind::Rate, metric.value() / metric.interval as f64),
        kind => (kind, metric.value()),
    };

    let timestamp = Utc
        .timestamp_opt(metric.timestamp(), 0)
        .single()
        .unwrap_or_default()
        .format(time_format)
        .to_string();

    let tags = format!("{{{}}}", metric.tags.join(","));
    let interval = metric.interval.to_string();
    let value = value.to_string();
    let fields: [&str; 10] = [
        metric.name.as_str(),
        &tags,
        kind.as_str(),
        metric.hostname.as_str(),
        server_hostname,
        metric.device_name.as_str(),
        &interval,
        &timestamp,
        &value,
        partition,
    ];
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.write_all(b"\t")?;
        }
        write_field(out, field)?;
    }
    out.write_all(b"\n")
}

/// Fields containing the delimiter, quotes, or newlines are quoted with
/// doubled inner quotes, CSV style.
fn write_field<W: Write>(out: &mut W, field: &str) -> std::io::Result<()> {
    if field.contains(['\t', '"', '\n', '\r']) {
        out.write_all(b"\"")?;
        out.write_all(field.replace('"', "\"\"").as_bytes())?;
        out.write_all(b"\"")
    } else {
        out.write_all(field.as_bytes())
    }
}

/// Writes each flush batch to `<dir>/corral-<unix_ts>.tsv`.
pub struct CsvSink {
    dir: PathBuf,
    server_hostname: String,
    time_format: String,
}

impl CsvSink {
    pub fn new(dir: PathBuf, server_hostname: String) -> Self {
        CsvSink {
            dir,
            server_hostname,
            time_format: DEFAULT_TIME_FORMAT.to_string(),
        }
    }
}

#[async_trait]
impl Sink for CsvSink {
    fn name(&self) -> &'static str {
        "csv"
    }

    async fn flush(&self, metrics: &[OutputMetric]) -> Result<(), SinkError> {
        let now = Utc::now();
        let partition = now.format("%Y%m%d").to_string();
        let path = self.dir.join(format!("corral-{}.tsv", now.timestamp()));

        let file = std::fs::File::create(&path)?;
        let mut writer = BufWriter::new(file);
        for metric in metrics {
            encode_tsv(
                metric,
                &mut writer,
                &self.server_hostname,
                &partition,
                &self.time_format,
            )?;
        }
        writer.flush()?;
        info!(rows = metrics.len(), path = %path.display(), "wrote flush spool file");
        Ok(())
    }
}
