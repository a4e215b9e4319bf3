//! JSON-over-HTTP messaging provider.

use std::time::Duration;

use async_trait::async_trait;
use metrics::{counter, histogram};
use reqwest::Client;
use tracing::{debug, warn};

use super::{MessagingProvider, OutboundRequest, ProviderError, ProviderReceipt};

/// Longest provider error body kept in a failure reason.
const MAX_ERROR_BODY: usize = 512;

/// Posts messages to `{base_url}/messages` with bearer auth.
#[derive(Debug, Clone)]
pub struct HttpMessagingProvider {
    client: Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpMessagingProvider {
    pub fn new(
        base_url: String,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/messages", base_url.trim_end_matches('/')),
            token,
        })
    }
}

#[async_trait]
impl MessagingProvider for HttpMessagingProvider {
    async fn send(&self, request: &OutboundRequest) -> Result<ProviderReceipt, ProviderError> {
        let started = std::time::Instant::now();
        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(ref token) = self.token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await.inspect_err(|err| {
            warn!(endpoint = %self.endpoint, error = %err, "Messaging provider unreachable");
            counter!("messaging_provider_requests_total", "outcome" => "network_error")
                .increment(1);
        })?;
        histogram!("messaging_provider_request_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        let status = response.status();
        if !status.is_success() {
            let body: String = response
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(MAX_ERROR_BODY)
                .collect();
            warn!(status = status.as_u16(), "Messaging provider rejected message");
            counter!("messaging_provider_requests_total", "outcome" => "rejected").increment(1);
            return Err(ProviderError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let receipt = response
            .json::<ProviderReceipt>()
            .await
            .map_err(|err| ProviderError::Decode(err.to_string()))?;

        counter!("messaging_provider_requests_total", "outcome" => "accepted").increment(1);
        debug!(provider_message_id = %receipt.provider_message_id, "Messaging provider accepted message");
        Ok(receipt)
    }
}
