//! Set: approximate distinct-count over opaque string members.

use super::{CombineError, FlushContext, Hll};
use crate::metrics::OutputMetric;

/// HyperLogLog-backed cardinality aggregator. The sketch is retained across
/// flushes, so the emitted gauge is the distinct count since the aggregator
/// was created (or last expired).
#[derive(Debug, Clone)]
pub struct Set {
    name: String,
    tags: Vec<String>,
    hll: Hll,
}

impl Set {
    pub fn new(name: String, tags: Vec<String>) -> Self {
        Set {
            name,
            tags,
            hll: Hll::new(),
        }
    }

    pub fn sample(&mut self, member: &str) {
        self.hll.insert(member.as_bytes());
    }

    pub fn flush(&self, ctx: &FlushContext<'_>) -> Vec<OutputMetric> {
        vec![OutputMetric::gauge(
            self.name.clone(),
            self.tags.clone(),
            ctx.timestamp,
            self.hll.estimate(),
        )]
    }

    pub fn export(&self) -> Vec<u8> {
        self.hll.to_bytes()
    }

    /// Lossless sketch union with an export of identical parameters.
    pub fn combine(&mut self, snapshot: &[u8]) -> Result<(), CombineError> {
        let other = Hll::from_bytes(snapshot)?;
        self.hll.merge(&other);
        Ok(())
    }
}
