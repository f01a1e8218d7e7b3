//! corral: a global DogStatsD aggregation server.
//!
//! Client hosts send metric samples over UDP; corral aggregates them across
//! the whole fleet (one aggregator per metric name + tag set, not per host)
//! and periodically flushes summarized series upstream over HTTPS. The
//! cross-fleet reservoir is what makes histogram percentiles meaningful:
//! per-host quantiles of a load-balanced service measure nothing.

pub mod aggregators;
pub mod config;
pub mod flusher;
pub mod listener;
pub mod metrics;
pub mod protocol;
pub mod server;
pub mod sinks;
pub mod telemetry;
pub mod worker;

pub use config::{Config, ConfigError};
pub use metrics::{MetricKind, MetricValue, OutputKind, OutputMetric, SampleRecord};
pub use server::{Server, ServerError};
