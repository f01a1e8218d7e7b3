//! Monotonic counter, flushed as a per-second rate.

use super::{CombineError, FlushContext};
use crate::metrics::OutputMetric;

/// Accumulates `value / sample_rate` per sample and flushes one rate-typed
/// output of `sum / interval_seconds`.
#[derive(Debug, Clone)]
pub struct Counter {
    name: String,
    tags: Vec<String>,
    value: f64,
}

impl Counter {
    pub fn new(name: String, tags: Vec<String>) -> Self {
        Counter { name, tags, value: 0.0 }
    }

    pub fn sample(&mut self, value: f64, sample_rate: f64) {
        self.value += value / sample_rate;
    }

    pub fn flush(&self, ctx: &FlushContext<'_>) -> Vec<OutputMetric> {
        vec![OutputMetric::rate(
            self.name.clone(),
            self.tags.clone(),
            ctx.timestamp,
            self.value / ctx.interval_secs as f64,
            ctx.interval_secs,
        )]
    }

    /// Accumulated sum as a little-endian f64.
    pub fn export(&self) -> Vec<u8> {
        self.value.to_le_bytes().to_vec()
    }

    /// Adds an exported sum into this counter.
    pub fn combine(&mut self, snapshot: &[u8]) -> Result<(), CombineError> {
        let bytes: [u8; 8] = snapshot.try_into().map_err(|_| CombineError::Truncated {
            expected: 8,
            got: snapshot.len(),
        })?;
        self.value += f64::from_le_bytes(bytes);
        Ok(())
    }
}
