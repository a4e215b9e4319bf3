//! # Storefront Handlers
//!
//! Connect and disconnect go through the storefront linker, which keeps the
//! tenant's own store row and the global registry in step.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::{OperatorAuth, UserHeader};
use crate::error::ApiError;
use crate::handlers::tenant_slug;
use crate::server::AppState;
use crate::session::{ANY_ROLE, MANAGERS, Principal};
use crate::tenant::types::{ConnectedStore, StoreCredentials};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DisconnectResponse {
    pub domain: String,
    /// The store row after disconnecting; absent when the domain was never connected
    pub store: Option<ConnectedStore>,
}

/// Connect a storefront
///
/// Takes the output of the storefront's token exchange.
#[utoipa::path(
    post,
    path = "/api/v1/tenants/{slug}/stores",
    security(("bearer_auth" = [])),
    params(("slug" = String, Path, description = "Tenant slug"), UserHeader),
    request_body = StoreCredentials,
    responses(
        (status = 201, description = "Storefront connected", body = ConnectedStore),
        (status = 409, description = "Domain owned by another tenant, or reconciliation required", body = ApiError)
    ),
    tag = "storefronts"
)]
pub async fn connect_store(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    principal: Principal,
    Path(slug): Path<String>,
    Json(request): Json<StoreCredentials>,
) -> Result<(StatusCode, Json<ConnectedStore>), ApiError> {
    let slug = tenant_slug(&slug)?;
    state
        .platform
        .sessions
        .authorize(&principal, &slug, MANAGERS)
        .await?;
    let store = state.platform.storefronts.connect(&slug, request).await?;
    Ok((StatusCode::CREATED, Json(store)))
}

/// Disconnect a storefront; disconnecting an unknown domain succeeds
#[utoipa::path(
    delete,
    path = "/api/v1/tenants/{slug}/stores/{domain}",
    security(("bearer_auth" = [])),
    params(
        ("slug" = String, Path, description = "Tenant slug"),
        ("domain" = String, Path, description = "Storefront domain"),
        UserHeader
    ),
    responses(
        (status = 200, description = "Disconnected", body = DisconnectResponse),
        (status = 403, description = "Not an owner or admin", body = ApiError)
    ),
    tag = "storefronts"
)]
pub async fn disconnect_store(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    principal: Principal,
    Path((slug, domain)): Path<(String, String)>,
) -> Result<Json<DisconnectResponse>, ApiError> {
    let slug = tenant_slug(&slug)?;
    state
        .platform
        .sessions
        .authorize(&principal, &slug, MANAGERS)
        .await?;
    let store = state.platform.storefronts.disconnect(&slug, &domain).await?;
    Ok(Json(DisconnectResponse {
        domain: store
            .as_ref()
            .map(|s| s.domain.clone())
            .unwrap_or(domain),
        store,
    }))
}

/// List connected storefronts
#[utoipa::path(
    get,
    path = "/api/v1/tenants/{slug}/stores",
    security(("bearer_auth" = [])),
    params(("slug" = String, Path, description = "Tenant slug"), UserHeader),
    responses(
        (status = 200, description = "Storefronts", body = [ConnectedStore])
    ),
    tag = "storefronts"
)]
pub async fn list_stores(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    principal: Principal,
    Path(slug): Path<String>,
) -> Result<Json<Vec<ConnectedStore>>, ApiError> {
    let slug = tenant_slug(&slug)?;
    state
        .platform
        .sessions
        .authorize(&principal, &slug, ANY_ROLE)
        .await?;
    Ok(Json(state.platform.storefronts.list_connected(&slug).await?))
}
