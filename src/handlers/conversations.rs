//! # Conversation Handlers
//!
//! Conversations are addressed by tenant slug and customer phone.

use axum::{
    extract::{Path, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::{OperatorAuth, UserHeader};
use crate::conversation::types::{
    Conversation, ConversationStatus, ConversationView, OutboundMessage, SendOutcome,
};
use crate::conversation::ConversationHandle;
use crate::error::ApiError;
use crate::handlers::tenant_slug;
use crate::server::AppState;
use crate::session::{ANY_ROLE, Principal};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UpdateConversationStatusRequest {
    pub status: ConversationStatus,
}

async fn authorized_conversation(
    state: &AppState,
    principal: &Principal,
    slug: &str,
    phone: &str,
) -> Result<ConversationHandle, ApiError> {
    let slug = tenant_slug(slug)?;
    state
        .platform
        .sessions
        .authorize(principal, &slug, ANY_ROLE)
        .await?;
    Ok(state.platform.conversation(&slug, phone).await?)
}

/// Get a conversation and its messages
#[utoipa::path(
    get,
    path = "/api/v1/tenants/{slug}/conversations/{phone}",
    security(("bearer_auth" = [])),
    params(
        ("slug" = String, Path, description = "Tenant slug"),
        ("phone" = String, Path, description = "Customer phone, E.164"),
        UserHeader
    ),
    responses(
        (status = 200, description = "Conversation", body = ConversationView),
        (status = 404, description = "No conversation with this customer", body = ApiError)
    ),
    tag = "conversations"
)]
pub async fn get_conversation(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    principal: Principal,
    Path((slug, phone)): Path<(String, String)>,
) -> Result<Json<ConversationView>, ApiError> {
    let conversation = authorized_conversation(&state, &principal, &slug, &phone).await?;
    Ok(Json(conversation.get_conversation().await?))
}

/// Send a message to a customer
///
/// A provider failure is recorded on the message (`status = failed`) rather than
/// returned as an error.
#[utoipa::path(
    post,
    path = "/api/v1/tenants/{slug}/conversations/{phone}/messages",
    security(("bearer_auth" = [])),
    params(
        ("slug" = String, Path, description = "Tenant slug"),
        ("phone" = String, Path, description = "Customer phone, E.164"),
        UserHeader
    ),
    request_body = OutboundMessage,
    responses(
        (status = 200, description = "Message recorded", body = SendOutcome),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 409, description = "Conversation archived", body = ApiError)
    ),
    tag = "conversations"
)]
pub async fn send_message(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    principal: Principal,
    Path((slug, phone)): Path<(String, String)>,
    Json(request): Json<OutboundMessage>,
) -> Result<Json<SendOutcome>, ApiError> {
    let conversation = authorized_conversation(&state, &principal, &slug, &phone).await?;
    Ok(Json(conversation.send_message(request).await?))
}

/// Change a conversation's status
#[utoipa::path(
    put,
    path = "/api/v1/tenants/{slug}/conversations/{phone}/status",
    security(("bearer_auth" = [])),
    params(
        ("slug" = String, Path, description = "Tenant slug"),
        ("phone" = String, Path, description = "Customer phone, E.164"),
        UserHeader
    ),
    request_body = UpdateConversationStatusRequest,
    responses(
        (status = 200, description = "Conversation updated", body = Conversation),
        (status = 404, description = "No conversation with this customer", body = ApiError)
    ),
    tag = "conversations"
)]
pub async fn update_conversation_status(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    principal: Principal,
    Path((slug, phone)): Path<(String, String)>,
    Json(request): Json<UpdateConversationStatusRequest>,
) -> Result<Json<Conversation>, ApiError> {
    let conversation = authorized_conversation(&state, &principal, &slug, &phone).await?;
    Ok(Json(conversation.update_status(request.status).await?))
}
