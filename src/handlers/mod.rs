//! # API Handlers
//!
//! Thin HTTP adapters over the platform. Every tenant-scoped route takes the
//! tenant slug from the path, resolves the principal from `X-User-Id`, and
//! authorizes through the session coordinator before calling an actor.

pub mod campaigns;
pub mod conversations;
pub mod customers;
pub mod storefronts;
pub mod tenants;
pub mod webhooks;

use axum::response::Json;

use crate::error::ApiError;
use crate::models::ServiceInfo;
use crate::normalization::TenantSlug;

/// Root handler that returns basic service information
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Service information", body = ServiceInfo)
    ),
    tag = "root"
)]
pub async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo::default())
}

/// Parses the `{slug}` path segment.
pub(crate) fn tenant_slug(raw: &str) -> Result<TenantSlug, ApiError> {
    Ok(TenantSlug::parse(raw)?)
}

#[cfg(test)]
mod tests;
