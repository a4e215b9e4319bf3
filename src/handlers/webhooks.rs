//! # Webhook Handlers
//!
//! Storefront notifications are public and verified by HMAC signature.
//! Messaging provider callbacks arrive through the operator-authenticated API,
//! scoped to a tenant by path.

use std::collections::HashMap;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header::CONTENT_TYPE},
    response::Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::auth::OperatorAuth;
use crate::conversation::types::{DeliveryUpdate, InboundOutcome, Message, MessageStatus};
use crate::error::{ApiError, DomainError};
use crate::handlers::tenant_slug;
use crate::messaging::inbound::decode_inbound;
use crate::server::AppState;
use crate::storefront::UninstallOutcome;
use crate::storefront::webhook::{
    DOMAIN_HEADER, TOPIC_HEADER, UNINSTALL_TOPIC, UninstallPayload, verify_request,
};

/// Webhook accept response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WebhookAcceptResponse {
    /// Acceptance status
    pub status: String,
    /// Set when an uninstall disconnected a tenant's store
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<UninstallOutcome>,
}

/// Provider delivery callback
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeliveryCallback {
    /// Customer phone the message was sent to
    pub to: String,
    pub provider_message_id: String,
    pub status: MessageStatus,
    #[serde(default)]
    pub error: Option<String>,
}

/// Storefront notification endpoint
///
/// Only `app/uninstalled` has an effect; other topics are acknowledged and ignored.
#[utoipa::path(
    post,
    path = "/webhooks/storefront",
    params(
        ("X-Storefront-Hmac-Sha256" = String, Header, description = "Base64 HMAC-SHA256 of the raw body"),
        ("X-Storefront-Topic" = String, Header, description = "Notification topic"),
        ("X-Storefront-Domain" = Option<String>, Header, description = "Storefront domain")
    ),
    request_body(content = JsonValue, description = "Notification payload", content_type = "application/json"),
    responses(
        (status = 202, description = "Notification accepted", body = WebhookAcceptResponse),
        (status = 400, description = "Domain missing", body = ApiError),
        (status = 401, description = "Missing or invalid signature", body = ApiError),
        (status = 503, description = "Webhook verification not configured", body = ApiError)
    ),
    tag = "webhooks"
)]
pub async fn storefront_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<WebhookAcceptResponse>), ApiError> {
    verify_request(
        &headers,
        &body,
        state.config.storefront_webhook_secret.as_deref(),
    )
    .map_err(|err| {
        warn!(error = %err, "Storefront webhook rejected");
        ApiError::new(
            err.status_code(),
            "WEBHOOK_VERIFICATION_FAILED",
            err.to_string().as_str(),
        )
    })?;

    let topic = header_str(&headers, TOPIC_HEADER).unwrap_or_default();
    if topic != UNINSTALL_TOPIC {
        debug!(topic = %topic, "Ignoring storefront topic");
        return Ok(accepted(None));
    }

    let domain = match header_str(&headers, DOMAIN_HEADER) {
        Some(domain) if !domain.is_empty() => domain,
        _ => serde_json::from_slice::<UninstallPayload>(&body)
            .ok()
            .and_then(|payload| payload.domain)
            .ok_or_else(|| DomainError::validation("domain", "uninstall notification names no domain"))?,
    };

    let outcome = state.platform.storefronts.handle_uninstall(&domain).await?;
    info!(domain = %outcome.domain, tenant = ?outcome.tenant_slug, "Storefront uninstall processed");
    Ok(accepted(Some(outcome)))
}

/// Inbound customer message from the messaging provider
///
/// Accepts JSON or form-encoded bodies in any supported provider shape.
#[utoipa::path(
    post,
    path = "/api/v1/webhooks/messages/{slug}",
    security(("bearer_auth" = [])),
    params(("slug" = String, Path, description = "Tenant slug")),
    request_body(content = JsonValue, description = "Provider payload", content_type = "application/json"),
    responses(
        (status = 200, description = "Message recorded (or recognised as a duplicate)", body = InboundOutcome),
        (status = 400, description = "Payload not understood", body = ApiError),
        (status = 404, description = "Unknown tenant", body = ApiError)
    ),
    tag = "webhooks"
)]
pub async fn inbound_message(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(slug): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<InboundOutcome>, ApiError> {
    let slug = tenant_slug(&slug)?;
    let payload = parse_payload(&headers, &body)?;
    let inbound = decode_inbound(&payload, state.platform.clock.now())?;

    // Unknown tenants get a 404 instead of an orphan conversation store
    state.platform.tenant(&slug).await?.get_organization().await?;

    let conversation = state.platform.conversation(&slug, &inbound.from).await?;
    let outcome = conversation.record_inbound_message(inbound).await?;
    Ok(Json(outcome))
}

/// Delivery status callback from the messaging provider
#[utoipa::path(
    post,
    path = "/api/v1/webhooks/deliveries/{slug}",
    security(("bearer_auth" = [])),
    params(("slug" = String, Path, description = "Tenant slug")),
    request_body = DeliveryCallback,
    responses(
        (status = 200, description = "Message status after the update", body = Message),
        (status = 400, description = "Status not allowed", body = ApiError),
        (status = 404, description = "Unknown tenant or message", body = ApiError)
    ),
    tag = "webhooks"
)]
pub async fn delivery_status(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(slug): Path<String>,
    Json(callback): Json<DeliveryCallback>,
) -> Result<Json<Message>, ApiError> {
    let slug = tenant_slug(&slug)?;
    state.platform.tenant(&slug).await?.get_organization().await?;

    let conversation = state.platform.conversation(&slug, &callback.to).await?;
    let message = conversation
        .record_delivery_status(DeliveryUpdate {
            provider_message_id: callback.provider_message_id,
            status: callback.status,
            error: callback.error,
        })
        .await?;
    Ok(Json(message))
}

fn accepted(outcome: Option<UninstallOutcome>) -> (StatusCode, Json<WebhookAcceptResponse>) {
    (
        StatusCode::ACCEPTED,
        Json(WebhookAcceptResponse {
            status: "accepted".to_string(),
            outcome,
        }),
    )
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
}

/// Parses a JSON or form-encoded body into a JSON value.
fn parse_payload(headers: &HeaderMap, body: &[u8]) -> Result<JsonValue, ApiError> {
    let is_form = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/x-www-form-urlencoded"));

    if is_form {
        let fields: HashMap<String, String> = url::form_urlencoded::parse(body)
            .into_owned()
            .collect();
        return Ok(serde_json::to_value(fields).map_err(|err| {
            DomainError::validation("body", format!("unreadable form body: {err}"))
        })?);
    }

    serde_json::from_slice(body).map_err(|err| {
        DomainError::validation("body", format!("invalid JSON payload: {err}")).into()
    })
}
