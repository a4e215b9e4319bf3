//! # Messaging Provider
//!
//! Outbound delivery goes through [`MessagingProvider`]. Failures are values,
//! never panics: the conversation actor records them as a terminal `failed`
//! status on the message.

pub mod http;
pub mod inbound;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::config::MessagingConfig;
use crate::conversation::types::{MessageKind, MessageStatus};

pub use http::HttpMessagingProvider;
pub use inbound::decode_inbound;

/// One message handed to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundRequest {
    pub to: String,
    pub from: String,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
}

/// Provider acknowledgement of an accepted message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProviderReceipt {
    #[serde(alias = "id", alias = "messageId")]
    pub provider_message_id: String,
    #[serde(default = "default_receipt_status")]
    pub status: MessageStatus,
}

fn default_receipt_status() -> MessageStatus {
    MessageStatus::Sent
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("provider rejected message with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("provider response could not be decoded: {0}")]
    Decode(String),
}

#[async_trait]
pub trait MessagingProvider: Send + Sync {
    async fn send(&self, request: &OutboundRequest) -> Result<ProviderReceipt, ProviderError>;
}

pub type SharedProvider = Arc<dyn MessagingProvider>;

/// Provider used when no delivery endpoint is configured; logs and accepts.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingProvider;

#[async_trait]
impl MessagingProvider for LoggingProvider {
    async fn send(&self, request: &OutboundRequest) -> Result<ProviderReceipt, ProviderError> {
        let provider_message_id = format!("log-{}", Uuid::new_v4());
        info!(
            to = %request.to,
            from = %request.from,
            kind = %request.kind,
            provider_message_id = %provider_message_id,
            "Outbound message accepted by logging provider"
        );
        Ok(ProviderReceipt {
            provider_message_id,
            status: MessageStatus::Sent,
        })
    }
}

/// Builds the provider described by configuration.
pub fn provider_from_config(config: &MessagingConfig) -> Result<SharedProvider, ProviderError> {
    match config.provider_url {
        Some(ref url) => Ok(Arc::new(HttpMessagingProvider::new(
            url.clone(),
            config.provider_token.clone(),
            config.timeout(),
        )?)),
        None => Ok(Arc::new(LoggingProvider)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn logging_provider_accepts_everything() {
        let receipt = LoggingProvider
            .send(&OutboundRequest {
                to: "+15550102030".into(),
                from: "outpost".into(),
                content: "hi".into(),
                kind: MessageKind::Text,
            })
            .await
            .unwrap();

        assert_eq!(receipt.status, MessageStatus::Sent);
        assert!(receipt.provider_message_id.starts_with("log-"));
    }

    #[test]
    fn receipt_accepts_common_id_fields() {
        let receipt: ProviderReceipt =
            serde_json::from_str(r#"{"messageId":"wamid.1","status":"delivered"}"#).unwrap();
        assert_eq!(receipt.provider_message_id, "wamid.1");
        assert_eq!(receipt.status, MessageStatus::Delivered);

        let bare: ProviderReceipt = serde_json::from_str(r#"{"id":"SM1"}"#).unwrap();
        assert_eq!(bare.status, MessageStatus::Sent);
    }
}
