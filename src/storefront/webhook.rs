//! # Storefront Webhook Verification
//!
//! Storefront notifications carry a base64 HMAC-SHA256 of the raw request
//! body, keyed with the shared webhook secret. Comparison is constant time.

use axum::http::{HeaderMap, StatusCode};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the body signature.
pub const SIGNATURE_HEADER: &str = "x-storefront-hmac-sha256";
/// Header carrying the notification topic, e.g. `app/uninstalled`.
pub const TOPIC_HEADER: &str = "x-storefront-topic";
/// Header naming the storefront domain the notification is about.
pub const DOMAIN_HEADER: &str = "x-storefront-domain";

pub const UNINSTALL_TOPIC: &str = "app/uninstalled";

#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    #[error("Missing required signature header: {header}")]
    MissingSignature { header: &'static str },

    #[error("Invalid signature format: {0}")]
    InvalidSignatureFormat(String),

    #[error("Signature verification failed")]
    VerificationFailed,

    #[error("Webhook verification is not configured")]
    NotConfigured,
}

impl VerificationError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            VerificationError::NotConfigured => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

/// Computes the base64 signature for `body`.
pub fn sign_body(body: &[u8], secret: &str) -> Result<String, VerificationError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| VerificationError::VerificationFailed)?;
    mac.update(body);
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Verifies the base64 HMAC-SHA256 signature of a storefront notification.
pub fn verify_storefront_signature(
    body: &[u8],
    signature_header: &str,
    secret: &str,
) -> Result<(), VerificationError> {
    debug!(body_size = body.len(), "Verifying storefront webhook signature");

    if signature_header.is_empty() {
        return Err(VerificationError::MissingSignature {
            header: SIGNATURE_HEADER,
        });
    }

    let provided = STANDARD
        .decode(signature_header.trim())
        .map_err(|_| VerificationError::InvalidSignatureFormat("signature is not base64".into()))?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| VerificationError::VerificationFailed)?;
    mac.update(body);
    let expected = mac.finalize().into_bytes();

    let expected: &[u8] = expected.as_ref();
    if expected.ct_eq(&provided[..]).into() {
        Ok(())
    } else {
        Err(VerificationError::VerificationFailed)
    }
}

/// Verifies a request against the configured secret, reading the signature header.
pub fn verify_request(
    headers: &HeaderMap,
    body: &[u8],
    secret: Option<&str>,
) -> Result<(), VerificationError> {
    let secret = secret.ok_or(VerificationError::NotConfigured)?;
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("");
    verify_storefront_signature(body, signature, secret)
}

/// Body of an uninstall notification. The domain header wins when both are present.
#[derive(Debug, Clone, Deserialize)]
pub struct UninstallPayload {
    #[serde(alias = "myshopify_domain", alias = "shop_domain")]
    pub domain: Option<String>,
}
