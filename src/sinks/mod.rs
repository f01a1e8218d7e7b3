//! Flush destinations.
//!
//! The flusher hands every finalized batch to each configured sink. Sinks
//! are independent: one failing is logged and counted without affecting the
//! others, and nothing is retried within an interval.

mod csv;
mod datadog;

pub use csv::{encode_tsv, CsvSink, DEFAULT_TIME_FORMAT};
pub use datadog::DatadogSink;

use crate::metrics::OutputMetric;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("upstream returned status {0}")]
    Status(u16),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait Sink: Send + Sync {
    fn name(&self) -> &'static str;

    /// Ships one flush batch. Errors are counted by the caller; the batch is
    /// not retried.
    async fn flush(&self, metrics: &[OutputMetric]) -> Result<(), SinkError>;
}
