//! Per-fingerprint streaming aggregators.
//!
//! One aggregator accumulates every sample of one (name, type, tag set)
//! inside one worker. Each type defines `sample`, `flush`, and an
//! `export`/`combine` pair whose byte payloads are stable across versions so
//! fleet-level merges keep working after upgrades.

mod counter;
mod gauge;
mod histogram;
mod hll;
mod reservoir;
mod set;

pub use counter::Counter;
pub use gauge::Gauge;
pub use histogram::Histogram;
pub use hll::Hll;
pub use reservoir::Reservoir;
pub use set::Set;

use thiserror::Error;

/// Parameters a flush tick hands every aggregator.
#[derive(Debug, Clone, Copy)]
pub struct FlushContext<'a> {
    /// Flush period in seconds; denominator for rate-typed outputs.
    pub interval_secs: u64,
    /// Unix timestamp stamped on every output point.
    pub timestamp: i64,
    /// Histogram percentiles, each in (0, 1), emitted in configured order.
    pub percentiles: &'a [f64],
    /// Histogram aggregate selection.
    pub aggregates: Aggregates,
}

/// Bitmask of the histogram aggregates to emit on flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aggregates(u8);

impl Aggregates {
    pub const MAX: Aggregates = Aggregates(1 << 0);
    pub const MIN: Aggregates = Aggregates(1 << 1);
    pub const SUM: Aggregates = Aggregates(1 << 2);
    pub const AVG: Aggregates = Aggregates(1 << 3);
    pub const COUNT: Aggregates = Aggregates(1 << 4);
    pub const MEDIAN: Aggregates = Aggregates(1 << 5);

    pub const fn empty() -> Aggregates {
        Aggregates(0)
    }

    pub const fn all() -> Aggregates {
        Aggregates(
            Self::MAX.0 | Self::MIN.0 | Self::SUM.0 | Self::AVG.0 | Self::COUNT.0 | Self::MEDIAN.0,
        )
    }

    pub const fn with(self, other: Aggregates) -> Aggregates {
        Aggregates(self.0 | other.0)
    }

    pub const fn contains(self, other: Aggregates) -> bool {
        self.0 & other.0 == other.0
    }

    /// Parses config names like `["min", "max", "count"]`.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Aggregates, String> {
        let mut out = Aggregates::empty();
        for name in names {
            out = out.with(match name.as_ref() {
                "max" => Self::MAX,
                "min" => Self::MIN,
                "sum" => Self::SUM,
                "avg" => Self::AVG,
                "count" => Self::COUNT,
                "median" => Self::MEDIAN,
                other => return Err(format!("unknown histogram aggregate {:?}", other)),
            });
        }
        Ok(out)
    }
}

impl Default for Aggregates {
    /// `min`, `max`, `count`.
    fn default() -> Self {
        Aggregates::MIN.with(Aggregates::MAX).with(Aggregates::COUNT)
    }
}

/// Failure merging an exported snapshot into a live aggregator.
#[derive(Debug, Error, PartialEq)]
pub enum CombineError {
    #[error("snapshot payload truncated (expected {expected} bytes, got {got})")]
    Truncated { expected: usize, got: usize },
    #[error("unsupported snapshot version {0}")]
    Version(u8),
    #[error("sketch parameter mismatch: {0}")]
    ParameterMismatch(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_names_round_trip() {
        let aggs =
            Aggregates::from_names(&["min", "max", "median", "avg", "count", "sum"]).unwrap();
        assert_eq!(aggs, Aggregates::all());
        assert!(aggs.contains(Aggregates::MEDIAN));
    }

    #[test]
    fn unknown_aggregate_name_is_rejected() {
        assert!(Aggregates::from_names(&["p99"]).is_err());
    }

    #[test]
    fn default_aggregates() {
        let d = Aggregates::default();
        assert!(d.contains(Aggregates::MIN));
        assert!(d.contains(Aggregates::MAX));
        assert!(d.contains(Aggregates::COUNT));
        assert!(!d.contains(Aggregates::MEDIAN));
    }
}
