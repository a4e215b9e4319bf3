//! # Tenant API Handlers
//!
//! Organization creation, membership listing and the invitation lifecycle.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{OperatorAuth, UserHeader};
use crate::error::ApiError;
use crate::handlers::tenant_slug;
use crate::repositories::GlobalMembership;
use crate::server::AppState;
use crate::session::{MembershipReconciliation, Principal};
use crate::tenant::types::{
    AcceptedInvitation, Invitation, IssuedInvitation, Member, Organization, Role,
};

/// Request payload for creating a tenant
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateTenantRequest {
    /// Tenant slug: lowercase letters, digits and hyphens
    #[schema(example = "acme")]
    pub slug: String,
    /// Display name (required, max 200 characters)
    #[schema(example = "Acme Corp")]
    pub name: String,
    pub logo_url: Option<String>,
    /// Email of the creating user, recorded on the owner membership
    pub owner_email: Option<String>,
}

/// Response payload for tenant creation
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateTenantResponse {
    pub organization: Organization,
    pub owner: Member,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateInvitationRequest {
    #[schema(example = "ada@example.com")]
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AcceptInvitationRequest {
    /// Token delivered in the invitation mail
    pub token: String,
}

/// Create a tenant with the calling user as owner
#[utoipa::path(
    post,
    path = "/api/v1/tenants",
    security(("bearer_auth" = [])),
    params(UserHeader),
    request_body = CreateTenantRequest,
    responses(
        (status = 201, description = "Tenant created", body = CreateTenantResponse),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 401, description = "Missing credentials", body = ApiError),
        (status = 409, description = "Tenant already exists", body = ApiError)
    ),
    tag = "tenants"
)]
pub async fn create_tenant(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    principal: Principal,
    Json(request): Json<CreateTenantRequest>,
) -> Result<(StatusCode, Json<CreateTenantResponse>), ApiError> {
    let slug = tenant_slug(&request.slug)?;
    let (organization, owner) = state
        .platform
        .sessions
        .create_organization(
            &principal,
            &slug,
            request.name,
            request.logo_url,
            request.owner_email,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateTenantResponse {
            organization,
            owner,
        }),
    ))
}

/// Get a tenant's organization
#[utoipa::path(
    get,
    path = "/api/v1/tenants/{slug}",
    security(("bearer_auth" = [])),
    params(("slug" = String, Path, description = "Tenant slug"), UserHeader),
    responses(
        (status = 200, description = "Organization", body = Organization),
        (status = 403, description = "Not a member", body = ApiError),
        (status = 404, description = "Tenant not found", body = ApiError)
    ),
    tag = "tenants"
)]
pub async fn get_tenant(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    principal: Principal,
    Path(slug): Path<String>,
) -> Result<Json<Organization>, ApiError> {
    let slug = tenant_slug(&slug)?;
    let organization = state
        .platform
        .sessions
        .get_organization(&principal, &slug)
        .await?;
    Ok(Json(organization))
}

/// List the tenants the calling user belongs to
#[utoipa::path(
    get,
    path = "/api/v1/me/tenants",
    security(("bearer_auth" = [])),
    params(UserHeader),
    responses(
        (status = 200, description = "Memberships of the caller", body = [GlobalMembership]),
        (status = 401, description = "Missing credentials", body = ApiError)
    ),
    tag = "tenants"
)]
pub async fn my_tenants(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    principal: Principal,
) -> Result<Json<Vec<GlobalMembership>>, ApiError> {
    Ok(Json(state.platform.sessions.tenants_for(&principal).await?))
}

/// List a tenant's members
#[utoipa::path(
    get,
    path = "/api/v1/tenants/{slug}/members",
    security(("bearer_auth" = [])),
    params(("slug" = String, Path, description = "Tenant slug"), UserHeader),
    responses(
        (status = 200, description = "Members", body = [Member]),
        (status = 403, description = "Not a member", body = ApiError)
    ),
    tag = "tenants"
)]
pub async fn list_members(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    principal: Principal,
    Path(slug): Path<String>,
) -> Result<Json<Vec<Member>>, ApiError> {
    let slug = tenant_slug(&slug)?;
    Ok(Json(
        state.platform.sessions.list_members(&principal, &slug).await?,
    ))
}

/// Re-drive local memberships into the global membership table
#[utoipa::path(
    post,
    path = "/api/v1/tenants/{slug}/members/reconcile",
    security(("bearer_auth" = [])),
    params(("slug" = String, Path, description = "Tenant slug"), UserHeader),
    responses(
        (status = 200, description = "Reconciliation report", body = MembershipReconciliation),
        (status = 403, description = "Not an owner or admin", body = ApiError)
    ),
    tag = "tenants"
)]
pub async fn reconcile_members(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    principal: Principal,
    Path(slug): Path<String>,
) -> Result<Json<MembershipReconciliation>, ApiError> {
    let slug = tenant_slug(&slug)?;
    Ok(Json(
        state
            .platform
            .sessions
            .reconcile_as(&principal, &slug)
            .await?,
    ))
}

/// Invite someone to a tenant
#[utoipa::path(
    post,
    path = "/api/v1/tenants/{slug}/invitations",
    security(("bearer_auth" = [])),
    params(("slug" = String, Path, description = "Tenant slug"), UserHeader),
    request_body = CreateInvitationRequest,
    responses(
        (status = 201, description = "Invitation issued; the token is only returned here", body = IssuedInvitation),
        (status = 403, description = "Not an owner or admin", body = ApiError),
        (status = 409, description = "Already a member or already invited", body = ApiError)
    ),
    tag = "invitations"
)]
pub async fn create_invitation(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    principal: Principal,
    Path(slug): Path<String>,
    Json(request): Json<CreateInvitationRequest>,
) -> Result<(StatusCode, Json<IssuedInvitation>), ApiError> {
    let slug = tenant_slug(&slug)?;
    let issued = state
        .platform
        .sessions
        .create_invitation(&principal, &slug, request.email, request.role)
        .await?;
    Ok((StatusCode::CREATED, Json(issued)))
}

/// List a tenant's invitations
#[utoipa::path(
    get,
    path = "/api/v1/tenants/{slug}/invitations",
    security(("bearer_auth" = [])),
    params(("slug" = String, Path, description = "Tenant slug"), UserHeader),
    responses(
        (status = 200, description = "Invitations", body = [Invitation]),
        (status = 403, description = "Not an owner or admin", body = ApiError)
    ),
    tag = "invitations"
)]
pub async fn list_invitations(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    principal: Principal,
    Path(slug): Path<String>,
) -> Result<Json<Vec<Invitation>>, ApiError> {
    let slug = tenant_slug(&slug)?;
    Ok(Json(
        state
            .platform
            .sessions
            .list_invitations(&principal, &slug)
            .await?,
    ))
}

/// Accept an invitation as the calling user
#[utoipa::path(
    post,
    path = "/api/v1/tenants/{slug}/invitations/accept",
    security(("bearer_auth" = [])),
    params(("slug" = String, Path, description = "Tenant slug"), UserHeader),
    request_body = AcceptInvitationRequest,
    responses(
        (status = 200, description = "Membership granted", body = AcceptedInvitation),
        (status = 404, description = "Unknown token", body = ApiError),
        (status = 409, description = "Accepted by someone else", body = ApiError),
        (status = 410, description = "Expired or revoked", body = ApiError)
    ),
    tag = "invitations"
)]
pub async fn accept_invitation(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    principal: Principal,
    Path(slug): Path<String>,
    Json(request): Json<AcceptInvitationRequest>,
) -> Result<Json<AcceptedInvitation>, ApiError> {
    let slug = tenant_slug(&slug)?;
    Ok(Json(
        state
            .platform
            .sessions
            .accept_invitation(&principal, &slug, request.token)
            .await?,
    ))
}

/// Revoke a pending invitation
#[utoipa::path(
    post,
    path = "/api/v1/tenants/{slug}/invitations/{invitation_id}/revoke",
    security(("bearer_auth" = [])),
    params(
        ("slug" = String, Path, description = "Tenant slug"),
        ("invitation_id" = Uuid, Path, description = "Invitation id"),
        UserHeader
    ),
    responses(
        (status = 200, description = "Invitation revoked", body = Invitation),
        (status = 403, description = "Not an owner or admin", body = ApiError),
        (status = 404, description = "Unknown invitation", body = ApiError)
    ),
    tag = "invitations"
)]
pub async fn revoke_invitation(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    principal: Principal,
    Path((slug, invitation_id)): Path<(String, Uuid)>,
) -> Result<Json<Invitation>, ApiError> {
    let slug = tenant_slug(&slug)?;
    Ok(Json(
        state
            .platform
            .sessions
            .revoke_invitation(&principal, &slug, invitation_id)
            .await?,
    ))
}
