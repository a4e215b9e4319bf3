//! # Campaign Handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::auth::{OperatorAuth, UserHeader};
use crate::error::ApiError;
use crate::handlers::tenant_slug;
use crate::launch::LaunchSummary;
use crate::server::AppState;
use crate::session::{ANY_ROLE, MANAGERS, Principal};
use crate::tenant::types::{Campaign, NewCampaign};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SetCampaignSegmentsRequest {
    pub segment_ids: Vec<Uuid>,
}

/// Query parameters for a launch
#[derive(Debug, Default, Deserialize, Serialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct LaunchQuery {
    /// Compute counts only; no conversation is touched
    #[serde(default)]
    pub dry_run: bool,
}

/// Create a campaign in `draft`
#[utoipa::path(
    post,
    path = "/api/v1/tenants/{slug}/campaigns",
    security(("bearer_auth" = [])),
    params(("slug" = String, Path, description = "Tenant slug"), UserHeader),
    request_body = NewCampaign,
    responses(
        (status = 201, description = "Campaign created", body = Campaign),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 404, description = "Unknown segment", body = ApiError)
    ),
    tag = "campaigns"
)]
pub async fn create_campaign(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    principal: Principal,
    Path(slug): Path<String>,
    Json(request): Json<NewCampaign>,
) -> Result<(StatusCode, Json<Campaign>), ApiError> {
    let slug = tenant_slug(&slug)?;
    state
        .platform
        .sessions
        .authorize(&principal, &slug, ANY_ROLE)
        .await?;
    let campaign = state
        .platform
        .tenant(&slug)
        .await?
        .create_campaign(request)
        .await?;
    Ok((StatusCode::CREATED, Json(campaign)))
}

/// List campaigns
#[utoipa::path(
    get,
    path = "/api/v1/tenants/{slug}/campaigns",
    security(("bearer_auth" = [])),
    params(("slug" = String, Path, description = "Tenant slug"), UserHeader),
    responses(
        (status = 200, description = "Campaigns", body = [Campaign])
    ),
    tag = "campaigns"
)]
pub async fn list_campaigns(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    principal: Principal,
    Path(slug): Path<String>,
) -> Result<Json<Vec<Campaign>>, ApiError> {
    let slug = tenant_slug(&slug)?;
    state
        .platform
        .sessions
        .authorize(&principal, &slug, ANY_ROLE)
        .await?;
    Ok(Json(
        state.platform.tenant(&slug).await?.list_campaigns().await?,
    ))
}

/// Get one campaign with its launch counters
#[utoipa::path(
    get,
    path = "/api/v1/tenants/{slug}/campaigns/{campaign_id}",
    security(("bearer_auth" = [])),
    params(
        ("slug" = String, Path, description = "Tenant slug"),
        ("campaign_id" = Uuid, Path, description = "Campaign id"),
        UserHeader
    ),
    responses(
        (status = 200, description = "Campaign", body = Campaign),
        (status = 404, description = "Unknown campaign", body = ApiError)
    ),
    tag = "campaigns"
)]
pub async fn get_campaign(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    principal: Principal,
    Path((slug, campaign_id)): Path<(String, Uuid)>,
) -> Result<Json<Campaign>, ApiError> {
    let slug = tenant_slug(&slug)?;
    state
        .platform
        .sessions
        .authorize(&principal, &slug, ANY_ROLE)
        .await?;
    Ok(Json(
        state
            .platform
            .tenant(&slug)
            .await?
            .get_campaign(campaign_id)
            .await?,
    ))
}

/// Replace a campaign's target segments
#[utoipa::path(
    put,
    path = "/api/v1/tenants/{slug}/campaigns/{campaign_id}/segments",
    security(("bearer_auth" = [])),
    params(
        ("slug" = String, Path, description = "Tenant slug"),
        ("campaign_id" = Uuid, Path, description = "Campaign id"),
        UserHeader
    ),
    request_body = SetCampaignSegmentsRequest,
    responses(
        (status = 200, description = "Campaign updated", body = Campaign),
        (status = 404, description = "Unknown campaign or segment", body = ApiError),
        (status = 409, description = "Campaign already launched", body = ApiError)
    ),
    tag = "campaigns"
)]
pub async fn set_campaign_segments(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    principal: Principal,
    Path((slug, campaign_id)): Path<(String, Uuid)>,
    Json(request): Json<SetCampaignSegmentsRequest>,
) -> Result<Json<Campaign>, ApiError> {
    let slug = tenant_slug(&slug)?;
    state
        .platform
        .sessions
        .authorize(&principal, &slug, ANY_ROLE)
        .await?;
    Ok(Json(
        state
            .platform
            .tenant(&slug)
            .await?
            .set_campaign_segments(campaign_id, request.segment_ids)
            .await?,
    ))
}

/// Launch a campaign
///
/// Re-launching is safe: customers already contacted are counted, not messaged again.
#[utoipa::path(
    post,
    path = "/api/v1/tenants/{slug}/campaigns/{campaign_id}/launch",
    security(("bearer_auth" = [])),
    params(
        ("slug" = String, Path, description = "Tenant slug"),
        ("campaign_id" = Uuid, Path, description = "Campaign id"),
        LaunchQuery,
        UserHeader
    ),
    responses(
        (status = 200, description = "Launch summary; per-customer failures are listed, not raised", body = LaunchSummary),
        (status = 403, description = "Not an owner or admin", body = ApiError),
        (status = 404, description = "Unknown campaign or segment", body = ApiError)
    ),
    tag = "campaigns"
)]
pub async fn launch_campaign(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    principal: Principal,
    Path((slug, campaign_id)): Path<(String, Uuid)>,
    Query(query): Query<LaunchQuery>,
) -> Result<Json<LaunchSummary>, ApiError> {
    let slug = tenant_slug(&slug)?;
    state
        .platform
        .sessions
        .authorize(&principal, &slug, MANAGERS)
        .await?;
    let summary = state
        .platform
        .launcher
        .launch(&slug, campaign_id, query.dry_run)
        .await?;
    Ok(Json(summary))
}
