//! Last-writer-wins gauge.

use super::{CombineError, FlushContext};
use crate::metrics::OutputMetric;

#[derive(Debug, Clone)]
pub struct Gauge {
    name: String,
    tags: Vec<String>,
    value: f64,
}

impl Gauge {
    pub fn new(name: String, tags: Vec<String>) -> Self {
        Gauge { name, tags, value: 0.0 }
    }

    /// Sample rate is irrelevant for gauges; the last value wins.
    pub fn sample(&mut self, value: f64, _sample_rate: f64) {
        self.value = value;
    }

    pub fn flush(&self, ctx: &FlushContext<'_>) -> Vec<OutputMetric> {
        vec![OutputMetric::gauge(
            self.name.clone(),
            self.tags.clone(),
            ctx.timestamp,
            self.value,
        )]
    }

    pub fn export(&self) -> Vec<u8> {
        self.value.to_le_bytes().to_vec()
    }

    /// The exported value overwrites the local one, matching last-writer-wins.
    pub fn combine(&mut self, snapshot: &[u8]) -> Result<(), CombineError> {
        let bytes: [u8; 8] = snapshot.try_into().map_err(|_| CombineError::Truncated {
            expected: 8,
            got: snapshot.len(),
        })?;
        self.value = f64::from_le_bytes(bytes);
        Ok(())
    }
}
