//! Server configuration: TOML file loading, defaults, validation.

use crate::aggregators::Aggregates;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Upstream base URL. Empty disables the upstream sink (useful for
    /// spool-only deployments).
    pub api_hostname: String,
    /// Upstream API key.
    pub key: String,
    /// DogStatsD ingest bind address.
    pub udp_address: String,
    /// Aggregation worker pool size.
    pub num_workers: usize,
    /// Parallel UDP reader tasks sharing the ingest socket.
    pub num_readers: usize,
    /// Per-datagram receive buffer in bytes; longer datagrams truncate.
    pub buffer_size: usize,
    /// Flush period in seconds.
    pub interval: u64,
    /// Seconds of idleness after which an aggregator is evicted.
    pub expiry: u64,
    /// Per-worker flush snapshot timeout in milliseconds.
    pub flush_timeout: u64,
    /// Histogram percentiles, each in (0, 1).
    pub percentiles: Vec<f64>,
    /// Histogram aggregates to emit (min/max/sum/avg/count/median).
    pub aggregates: Vec<String>,
    /// Hostname attached to flushed metrics; empty disables host
    /// attribution entirely.
    pub hostname: String,
    /// Tags appended to every flushed metric.
    pub tags: Vec<String>,
    /// Self-telemetry DogStatsD endpoint.
    pub stats_address: String,
    /// Sampling rate for the per-datagram received counter.
    pub sample_rate: f64,
    /// Directory for TSV spool files; empty disables the CSV sink.
    pub flush_file: String,
    /// Verbose diagnostics.
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            api_hostname: String::new(),
            key: String::new(),
            udp_address: "127.0.0.1:8126".to_string(),
            num_workers: 4,
            num_readers: 1,
            buffer_size: 8192,
            interval: 10,
            expiry: 300,
            flush_timeout: 1000,
            percentiles: vec![0.5, 0.75, 0.99],
            aggregates: vec!["min".to_string(), "max".to_string(), "count".to_string()],
            hostname: String::new(),
            tags: Vec::new(),
            stats_address: "127.0.0.1:8125".to_string(),
            sample_rate: 1.0,
            flush_file: String::new(),
            debug: false,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));
        if self.udp_address.is_empty() {
            return invalid("udp_address must not be empty".to_string());
        }
        if self.num_workers == 0 {
            return invalid("num_workers must be at least 1".to_string());
        }
        if self.num_readers == 0 {
            return invalid("num_readers must be at least 1".to_string());
        }
        if self.buffer_size < 512 {
            return invalid(format!("buffer_size {} below minimum 512", self.buffer_size));
        }
        if self.interval == 0 {
            return invalid("interval must be at least 1 second".to_string());
        }
        if !(0.0..=1.0).contains(&self.sample_rate) || self.sample_rate == 0.0 {
            return invalid(format!("sample_rate {} outside (0, 1]", self.sample_rate));
        }
        for &p in &self.percentiles {
            if !(0.0 < p && p < 1.0) {
                return invalid(format!("percentile {} outside (0, 1)", p));
            }
        }
        Aggregates::from_names(&self.aggregates).map_err(ConfigError::Invalid)?;
        if !self.api_hostname.is_empty() && self.key.is_empty() {
            return invalid("key is required when api_hostname is set".to_string());
        }
        Ok(())
    }

    /// Parsed aggregate selection. Call after `validate`.
    pub fn histogram_aggregates(&self) -> Aggregates {
        Aggregates::from_names(&self.aggregates).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_a_minimal_file_with_defaults() {
        let file = write_config(
            r#"
            udp_address = "127.0.0.1:9125"
            interval = 5
            "#,
        );
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.udp_address, "127.0.0.1:9125");
        assert_eq!(config.interval, 5);
        assert_eq!(config.num_workers, 4);
        assert_eq!(config.percentiles, vec![0.5, 0.75, 0.99]);
        assert_eq!(config.stats_address, "127.0.0.1:8125");
    }

    #[test]
    fn rejects_unknown_keys() {
        let file = write_config("not_a_real_option = true\n");
        assert!(matches!(Config::load(file.path()), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn rejects_bad_percentiles() {
        let config = Config {
            percentiles: vec![1.5],
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_zero_workers() {
        let config = Config {
            num_workers: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unknown_aggregate() {
        let config = Config {
            aggregates: vec!["p99".to_string()],
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn requires_key_with_api_hostname() {
        let config = Config {
            api_hostname: "https://example.com".to_string(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        assert!(matches!(
            Config::load(Path::new("/nonexistent/corral.toml")),
            Err(ConfigError::Io(_))
        ));
    }
}
