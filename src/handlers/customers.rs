//! # Customer and Segment Handlers

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
use crate::server::AppState;
use crate::session::{ANY_ROLE, Principal};
use crate::tenant::TenantHandle;
use crate::tenant::types::{Customer, ImportReport, NewCustomer, NewSegment, Segment};

/// Maximum rows accepted by one import request
const MAX_IMPORT_ROWS: usize = 5_000;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ImportCustomersRequest {
    pub customers: Vec<NewCustomer>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AddSegmentMembersRequest {
    pub customer_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AddSegmentMembersResponse {
    /// Customers added to the segment
    pub added: Vec<Uuid>,
}

async fn authorized_tenant(
    state: &AppState,
    principal: &Principal,
    slug: &str,
) -> Result<TenantHandle, ApiError> {
    let slug = tenant_slug(slug)?;
    state
        .platform
        .sessions
        .authorize(principal, &slug, ANY_ROLE)
        .await?;
    Ok(state.platform.tenant(&slug).await?)
}

/// Create a customer
#[utoipa::path(
    post,
    path = "/api/v1/tenants/{slug}/customers",
    security(("bearer_auth" = [])),
    params(("slug" = String, Path, description = "Tenant slug"), UserHeader),
    request_body = NewCustomer,
    responses(
        (status = 201, description = "Customer created", body = Customer),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 409, description = "Phone or email already in use", body = ApiError)
    ),
    tag = "customers"
)]
pub async fn create_customer(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    principal: Principal,
    Path(slug): Path<String>,
    Json(request): Json<NewCustomer>,
) -> Result<(StatusCode, Json<Customer>), ApiError> {
    let tenant = authorized_tenant(&state, &principal, &slug).await?;
    let customer = tenant.create_customer(request).await?;
    Ok((StatusCode::CREATED, Json(customer)))
}

/// List customers
#[utoipa::path(
    get,
    path = "/api/v1/tenants/{slug}/customers",
    security(("bearer_auth" = [])),
    params(("slug" = String, Path, description = "Tenant slug"), UserHeader),
    responses(
        (status = 200, description = "Customers", body = [Customer]),
        (status = 403, description = "Not a member", body = ApiError)
    ),
    tag = "customers"
)]
pub async fn list_customers(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    principal: Principal,
    Path(slug): Path<String>,
) -> Result<Json<Vec<Customer>>, ApiError> {
    let tenant = authorized_tenant(&state, &principal, &slug).await?;
    Ok(Json(tenant.list_customers().await?))
}

/// Import customers in bulk
///
/// Valid rows are committed together; invalid and duplicate rows are reported by index.
#[utoipa::path(
    post,
    path = "/api/v1/tenants/{slug}/customers/import",
    security(("bearer_auth" = [])),
    params(("slug" = String, Path, description = "Tenant slug"), UserHeader),
    request_body = ImportCustomersRequest,
    responses(
        (status = 200, description = "Import report", body = ImportReport),
        (status = 400, description = "Too many rows", body = ApiError)
    ),
    tag = "customers"
)]
pub async fn import_customers(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    principal: Principal,
    Path(slug): Path<String>,
    Json(request): Json<ImportCustomersRequest>,
) -> Result<Json<ImportReport>, ApiError> {
    if request.customers.len() > MAX_IMPORT_ROWS {
        return Err(crate::error::DomainError::validation(
            "customers",
            format!("at most {MAX_IMPORT_ROWS} rows per import"),
        )
        .into());
    }
    let tenant = authorized_tenant(&state, &principal, &slug).await?;
    Ok(Json(tenant.import_customers(request.customers).await?))
}

/// Create a segment
#[utoipa::path(
    post,
    path = "/api/v1/tenants/{slug}/segments",
    security(("bearer_auth" = [])),
    params(("slug" = String, Path, description = "Tenant slug"), UserHeader),
    request_body = NewSegment,
    responses(
        (status = 201, description = "Segment created", body = Segment),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 409, description = "Segment name in use", body = ApiError)
    ),
    tag = "segments"
)]
pub async fn create_segment(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    principal: Principal,
    Path(slug): Path<String>,
    Json(request): Json<NewSegment>,
) -> Result<(StatusCode, Json<Segment>), ApiError> {
    let tenant = authorized_tenant(&state, &principal, &slug).await?;
    let segment = tenant.create_segment(request).await?;
    Ok((StatusCode::CREATED, Json(segment)))
}

/// List segments
#[utoipa::path(
    get,
    path = "/api/v1/tenants/{slug}/segments",
    security(("bearer_auth" = [])),
    params(("slug" = String, Path, description = "Tenant slug"), UserHeader),
    responses(
        (status = 200, description = "Segments", body = [Segment])
    ),
    tag = "segments"
)]
pub async fn list_segments(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    principal: Principal,
    Path(slug): Path<String>,
) -> Result<Json<Vec<Segment>>, ApiError> {
    let tenant = authorized_tenant(&state, &principal, &slug).await?;
    Ok(Json(tenant.list_segments().await?))
}

/// Add customers to a manual segment
#[utoipa::path(
    post,
    path = "/api/v1/tenants/{slug}/segments/{segment_id}/customers",
    security(("bearer_auth" = [])),
    params(
        ("slug" = String, Path, description = "Tenant slug"),
        ("segment_id" = Uuid, Path, description = "Segment id"),
        UserHeader
    ),
    request_body = AddSegmentMembersRequest,
    responses(
        (status = 200, description = "Customers added", body = AddSegmentMembersResponse),
        (status = 404, description = "Unknown segment or customer", body = ApiError),
        (status = 409, description = "Customer already in segment", body = ApiError)
    ),
    tag = "segments"
)]
pub async fn add_segment_customers(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    principal: Principal,
    Path((slug, segment_id)): Path<(String, Uuid)>,
    Json(request): Json<AddSegmentMembersRequest>,
) -> Result<Json<AddSegmentMembersResponse>, ApiError> {
    let tenant = authorized_tenant(&state, &principal, &slug).await?;
    let added = tenant
        .add_customers_to_segment(segment_id, request.customer_ids)
        .await?;
    Ok(Json(AddSegmentMembersResponse { added }))
}

/// List the customers a segment currently resolves to
#[utoipa::path(
    get,
    path = "/api/v1/tenants/{slug}/segments/{segment_id}/customers",
    security(("bearer_auth" = [])),
    params(
        ("slug" = String, Path, description = "Tenant slug"),
        ("segment_id" = Uuid, Path, description = "Segment id"),
        UserHeader
    ),
    responses(
        (status = 200, description = "Segment members", body = [Customer]),
        (status = 404, description = "Unknown segment", body = ApiError)
    ),
    tag = "segments"
)]
pub async fn list_segment_customers(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    principal: Principal,
    Path((slug, segment_id)): Path<(String, Uuid)>,
) -> Result<Json<Vec<Customer>>, ApiError> {
    let tenant = authorized_tenant(&state, &principal, &slug).await?;
    Ok(Json(tenant.list_segment_members(segment_id).await?))
}
