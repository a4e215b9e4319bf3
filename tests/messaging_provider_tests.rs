//! HTTP messaging provider against a mock endpoint.

use std::time::Duration;

use outpost::conversation::types::{MessageKind, MessageStatus};
use outpost::messaging::{HttpMessagingProvider, MessagingProvider, OutboundRequest, ProviderError};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn request() -> OutboundRequest {
    OutboundRequest {
        to: "+15550102030".to_string(),
        from: "outpost".to_string(),
        content: "Spring sale starts today".to_string(),
        kind: MessageKind::Text,
    }
}

fn provider(server: &MockServer, token: Option<&str>) -> HttpMessagingProvider {
    HttpMessagingProvider::new(
        format!("{}/", server.uri()),
        token.map(str::to_string),
        Duration::from_secs(2),
    )
    .unwrap()
}

#[tokio::test]
async fn accepted_message_returns_receipt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .and(header("authorization", "Bearer provider-secret"))
        .and(body_json(json!({
            "to": "+15550102030",
            "from": "outpost",
            "content": "Spring sale starts today",
            "type": "text"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "SM123",
            "status": "pending"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let receipt = provider(&server, Some("provider-secret"))
        .send(&request())
        .await
        .unwrap();

    assert_eq!(receipt.provider_message_id, "SM123");
    assert_eq!(receipt.status, MessageStatus::Pending);
}

#[tokio::test]
async fn receipt_status_defaults_to_sent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "messageId": "SM9" })))
        .mount(&server)
        .await;

    let receipt = provider(&server, None).send(&request()).await.unwrap();

    assert_eq!(receipt.provider_message_id, "SM9");
    assert_eq!(receipt.status, MessageStatus::Sent);
}

#[tokio::test]
async fn rejection_keeps_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .respond_with(ResponseTemplate::new(422).set_body_string("recipient unreachable"))
        .mount(&server)
        .await;

    let err = provider(&server, None).send(&request()).await.unwrap_err();

    match err {
        ProviderError::Rejected { status, body } => {
            assert_eq!(status, 422);
            assert_eq!(body, "recipient unreachable");
        }
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn unreadable_receipt_is_a_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&server)
        .await;

    let err = provider(&server, None).send(&request()).await.unwrap_err();

    assert!(matches!(err, ProviderError::Decode(_)));
}
