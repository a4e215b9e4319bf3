//! # Error Handling
//!
//! Two layers live here. [`DomainError`] is the taxonomy every actor, store, and
//! coordinator speaks; native store errors are translated into it before they
//! cross an actor boundary. [`ApiError`] is the problem+json response the HTTP
//! surface renders, with trace ID propagation.

use std::fmt;

use axum::{
    extract::rejection::JsonRejection,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use utoipa::ToSchema;

use crate::telemetry;

/// Kinds of resources an error can refer to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Tenant,
    Member,
    Invitation,
    Customer,
    Segment,
    Campaign,
    Store,
    Conversation,
    Message,
}

impl Resource {
    pub const fn as_str(self) -> &'static str {
        match self {
            Resource::Tenant => "tenant",
            Resource::Member => "member",
            Resource::Invitation => "invitation",
            Resource::Customer => "customer",
            Resource::Segment => "segment",
            Resource::Campaign => "campaign",
            Resource::Store => "store",
            Resource::Conversation => "conversation",
            Resource::Message => "message",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse classification of a [`DomainError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    Conflict,
    Unauthenticated,
    Unauthorized,
    Expired,
    Revoked,
    Validation,
    Transient,
    ReconciliationRequired,
}

/// Domain error taxonomy shared by actors, registries, and coordinators
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("{resource} '{id}' not found")]
    NotFound { resource: Resource, id: String },
    #[error("{resource} '{key}' already exists")]
    AlreadyExists { resource: Resource, key: String },
    #[error("storefront '{domain}' is already connected to tenant '{owner}'")]
    ShopAlreadyConnected { domain: String, owner: String },
    #[error("{0}")]
    Conflict(String),
    #[error("authentication required")]
    Unauthenticated,
    #[error("not authorized: {0}")]
    Unauthorized(String),
    #[error("invitation expired at {expired_at}")]
    InvitationExpired { expired_at: DateTime<Utc> },
    #[error("invitation was revoked at {revoked_at}")]
    InvitationRevoked { revoked_at: DateTime<Utc> },
    #[error("invitation was already accepted at {accepted_at}")]
    InvitationAlreadyAccepted { accepted_at: DateTime<Utc> },
    #[error("invalid {field}: {message}")]
    Validation { field: &'static str, message: String },
    #[error("store unavailable, try again: {0}")]
    TransientStore(String),
    #[error("{operation} timed out; outcome unknown")]
    Timeout { operation: &'static str },
    #[error("actor '{key}' is unavailable")]
    ActorUnavailable { key: String },
    #[error("reconciliation required for {subject}: {detail}")]
    ReconciliationRequired { subject: String, detail: String },
}

impl DomainError {
    pub fn not_found(resource: Resource, id: impl fmt::Display) -> Self {
        Self::NotFound {
            resource,
            id: id.to_string(),
        }
    }

    pub fn already_exists(resource: Resource, key: impl fmt::Display) -> Self {
        Self::AlreadyExists {
            resource,
            key: key.to_string(),
        }
    }

    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainError::NotFound { .. } => ErrorKind::NotFound,
            DomainError::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            DomainError::ShopAlreadyConnected { .. }
            | DomainError::Conflict(_)
            | DomainError::InvitationAlreadyAccepted { .. } => ErrorKind::Conflict,
            DomainError::Unauthenticated => ErrorKind::Unauthenticated,
            DomainError::Unauthorized(_) => ErrorKind::Unauthorized,
            DomainError::InvitationExpired { .. } => ErrorKind::Expired,
            DomainError::InvitationRevoked { .. } => ErrorKind::Revoked,
            DomainError::Validation { .. } => ErrorKind::Validation,
            DomainError::TransientStore(_)
            | DomainError::Timeout { .. }
            | DomainError::ActorUnavailable { .. } => ErrorKind::Transient,
            DomainError::ReconciliationRequired { .. } => ErrorKind::ReconciliationRequired,
        }
    }

    /// Whether the whole operation may be retried as-is
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient)
    }
}

pub(crate) fn is_unique_violation(error: &sea_orm::DbErr) -> bool {
    use sea_orm::RuntimeErr;

    const PG_UNIQUE: &str = "23505";
    const SQLITE_DUPLICATE_CODES: &[&str] = &["1555", "2067"];

    let runtime_err = match error {
        sea_orm::DbErr::Query(RuntimeErr::SqlxError(sqlx_err))
        | sea_orm::DbErr::Exec(RuntimeErr::SqlxError(sqlx_err)) => sqlx_err,
        sea_orm::DbErr::RecordNotInserted => return false,
        _ => return false,
    };

    let Some(db_error) = runtime_err.as_database_error() else {
        return false;
    };

    if db_error.is_unique_violation() {
        return true;
    }

    if let Some(code) = db_error.code() {
        let code_str = code.as_ref();
        if code_str == PG_UNIQUE || SQLITE_DUPLICATE_CODES.contains(&code_str) {
            return true;
        }
    }

    false
}

impl From<sea_orm::DbErr> for DomainError {
    fn from(error: sea_orm::DbErr) -> Self {
        if is_unique_violation(&error) {
            tracing::debug!(?error, "Unique constraint violation detected");
            return DomainError::Conflict("resource already exists".to_string());
        }

        tracing::error!(?error, "Store operation failed");
        DomainError::TransientStore(error.to_string())
    }
}

/// Unified API error response structure
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    /// HTTP status code for the response
    #[serde(skip_serializing, skip_deserializing)]
    pub status: StatusCode,
    /// Error code for programmatic handling
    pub code: Box<str>,
    /// Human-readable error message
    pub message: Box<str>,
    /// Additional error details (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Box<serde_json::Value>>,
    /// Suggested retry delay in seconds (optional)
    pub retry_after: Option<u64>,
    /// Correlation trace ID for debugging (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Box<str>>,
}

impl ApiError {
    /// Create a new API error with the given status code and message
    pub fn new<S: Into<String>>(status: StatusCode, code: S, message: S) -> Self {
        Self {
            status,
            code: code.into().into_boxed_str(),
            message: message.into().into_boxed_str(),
            details: None,
            retry_after: None,
            trace_id: Self::current_trace_id(),
        }
    }

    /// Add details to the error
    pub fn with_details<V: Into<serde_json::Value>>(mut self, details: V) -> Self {
        self.details = Some(Box::new(details.into()));
        self
    }

    /// Set retry after delay
    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    /// Extract current trace ID from the active tracing span (falls back to generated correlation ID)
    fn current_trace_id() -> Option<Box<str>> {
        telemetry::current_trace_id()
            .map(|trace_id| trace_id.into_boxed_str())
            .or_else(|| {
                let id = uuid::Uuid::new_v4().simple().to_string();
                Some(format!("corr-{}", &id[..8]).into_boxed_str())
            })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-type",
            HeaderValue::from_static("application/problem+json"),
        );

        if let Some(retry_after) = self.retry_after
            && let Ok(header_value) = HeaderValue::from_str(&retry_after.to_string())
        {
            headers.insert("retry-after", header_value);
        }

        (self.status, headers, axum::Json(self)).into_response()
    }
}

impl From<DomainError> for ApiError {
    fn from(error: DomainError) -> Self {
        let message = error.to_string();
        match &error {
            DomainError::NotFound { resource, id } => {
                ApiError::new(StatusCode::NOT_FOUND, "NOT_FOUND", message.as_str())
                    .with_details(json!({ "resource": resource, "id": id }))
            }
            DomainError::AlreadyExists { resource, key } => {
                ApiError::new(StatusCode::CONFLICT, "ALREADY_EXISTS", message.as_str())
                    .with_details(json!({ "resource": resource, "key": key }))
            }
            DomainError::ShopAlreadyConnected { domain, owner } => {
                ApiError::new(StatusCode::CONFLICT, "SHOP_ALREADY_CONNECTED", message.as_str())
                    .with_details(json!({ "domain": domain, "owner": owner }))
            }
            DomainError::Conflict(_) => {
                ApiError::new(StatusCode::CONFLICT, "CONFLICT", message.as_str())
            }
            DomainError::Unauthenticated => unauthorized(Some(message.as_str())),
            DomainError::Unauthorized(_) => forbidden(Some(message.as_str())),
            DomainError::InvitationExpired { expired_at } => {
                ApiError::new(StatusCode::GONE, "INVITATION_EXPIRED", message.as_str())
                    .with_details(json!({ "expired_at": expired_at.to_rfc3339() }))
            }
            DomainError::InvitationRevoked { revoked_at } => {
                ApiError::new(StatusCode::GONE, "INVITATION_REVOKED", message.as_str())
                    .with_details(json!({ "revoked_at": revoked_at.to_rfc3339() }))
            }
            DomainError::InvitationAlreadyAccepted { accepted_at } => ApiError::new(
                StatusCode::CONFLICT,
                "INVITATION_ALREADY_ACCEPTED",
                message.as_str(),
            )
            .with_details(json!({ "accepted_at": accepted_at.to_rfc3339() })),
            DomainError::Validation { field, message: reason } => validation_error(
                message.as_str(),
                json!({ "field": field, "message": reason }),
            ),
            DomainError::TransientStore(_)
            | DomainError::Timeout { .. }
            | DomainError::ActorUnavailable { .. } => {
                tracing::warn!(error = %error, kind = ?error.kind(), "Transient failure surfaced to caller");
                ApiError::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Temporary failure, please try again",
                )
                .with_retry_after(1)
            }
            DomainError::ReconciliationRequired { subject, detail } => ApiError::new(
                StatusCode::CONFLICT,
                "RECONCILIATION_REQUIRED",
                message.as_str(),
            )
            .with_details(json!({ "subject": subject, "detail": detail })),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        tracing::error!("Internal error: {:?}", error);

        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "An internal error occurred",
        )
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match rejection {
            JsonRejection::JsonDataError(err) => format!("Invalid JSON: {}", err),
            JsonRejection::JsonSyntaxError(err) => format!("JSON syntax error: {}", err),
            JsonRejection::MissingJsonContentType(_) => {
                "Missing 'Content-Type: application/json' header".to_string()
            }
            _ => "Invalid request body".to_string(),
        };

        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", &message)
    }
}

/// Create an unauthorized error (401)
pub fn unauthorized(message: Option<&str>) -> ApiError {
    let msg = message.unwrap_or("Authentication required");
    ApiError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg)
}

/// Create a forbidden error (403)
pub fn forbidden(message: Option<&str>) -> ApiError {
    let msg = message.unwrap_or("Insufficient permissions");
    ApiError::new(StatusCode::FORBIDDEN, "FORBIDDEN", msg)
}

/// Create a validation error with field details
pub fn validation_error(message: &str, field_errors: serde_json::Value) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message).with_details(field_errors)
}
