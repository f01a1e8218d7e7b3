//! Upstream HTTPS sink: POST `{"series": [...]}` to the series endpoint.

use super::{Sink, SinkError};
use crate::metrics::OutputMetric;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct DatadogSink {
    client: reqwest::Client,
    url: String,
}

impl DatadogSink {
    /// `api_hostname` is the upstream base URL, e.g.
    /// `https://app.datadoghq.com`.
    pub fn new(api_hostname: &str, api_key: &str) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(DatadogSink {
            client,
            url: format!(
                "{}/api/v1/series?api_key={}",
                api_hostname.trim_end_matches('/'),
                api_key
            ),
        })
    }
}

#[async_trait]
impl Sink for DatadogSink {
    fn name(&self) -> &'static str {
        "datadog"
    }

    async fn flush(&self, metrics: &[OutputMetric]) -> Result<(), SinkError> {
        let body = serde_json::json!({ "series": metrics });
        let response = self.client.post(&self.url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Status(status.as_u16()));
        }
        debug!(metrics = metrics.len(), "posted series upstream");
        Ok(())
    }
}
