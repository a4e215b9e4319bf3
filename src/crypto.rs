//! Secret handling: AES-256-GCM encryption of storefront access tokens and
//! one-time invitation tokens stored as SHA-256 digests.
//!
//! Ciphertexts carry a version byte and a random nonce, and are bound through
//! additional authenticated data (AAD) to the tenant and storefront they
//! belong to, so a token copied into another tenant's store will not decrypt.

#![allow(deprecated)]

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
};
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

const VERSION_ENCRYPTED: u8 = 0x01;
const VERSION_FIELD_LEN: usize = 1;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const MIN_ENCRYPTED_LEN: usize = VERSION_FIELD_LEN + NONCE_LEN + TAG_LEN;
const INVITATION_TOKEN_BYTES: usize = 32;

/// Crypto error types
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("invalid ciphertext format")]
    InvalidFormat,
    #[error("empty ciphertext")]
    EmptyCiphertext,
    #[error("invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),
}

/// Secure wrapper for encryption keys with zeroization
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct CryptoKey(Vec<u8>);

impl std::fmt::Debug for CryptoKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CryptoKey([REDACTED])")
    }
}

impl CryptoKey {
    /// Create a new crypto key from bytes
    pub fn new(bytes: Vec<u8>) -> Result<Self, CryptoError> {
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKeyLength(bytes.len()));
        }
        Ok(CryptoKey(bytes))
    }

    /// Get the key as bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Encrypt bytes using AES-256-GCM
pub fn encrypt_bytes(
    key: &CryptoKey,
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher_key = Key::<Aes256Gcm>::from_slice(key.as_bytes());
    let cipher = Aes256Gcm::new(cipher_key);

    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let mut ciphertext = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    // version || nonce || ciphertext+tag
    let mut result = Vec::with_capacity(VERSION_FIELD_LEN + NONCE_LEN + ciphertext.len());
    result.push(VERSION_ENCRYPTED);
    result.extend_from_slice(&nonce);
    result.append(&mut ciphertext);

    Ok(result)
}

/// Decrypt bytes using AES-256-GCM
pub fn decrypt_bytes(
    key: &CryptoKey,
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.is_empty() {
        return Err(CryptoError::EmptyCiphertext);
    }

    if ciphertext[0] != VERSION_ENCRYPTED || ciphertext.len() < MIN_ENCRYPTED_LEN {
        return Err(CryptoError::InvalidFormat);
    }

    let nonce = Nonce::from_slice(&ciphertext[VERSION_FIELD_LEN..VERSION_FIELD_LEN + NONCE_LEN]);
    let tag_and_ct = &ciphertext[VERSION_FIELD_LEN + NONCE_LEN..];

    debug_assert!(tag_and_ct.len() >= TAG_LEN);

    let cipher_key = Key::<Aes256Gcm>::from_slice(key.as_bytes());
    let cipher = Aes256Gcm::new(cipher_key);

    cipher
        .decrypt(
            nonce,
            Payload {
                msg: tag_and_ct,
                aad,
            },
        )
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
}

fn store_token_aad(tenant_slug: &str, domain: &str) -> String {
    format!("{}|{}", tenant_slug, domain)
}

/// Encrypt a storefront access token for one tenant/domain pair
pub fn encrypt_store_token(
    key: &CryptoKey,
    tenant_slug: &str,
    domain: &str,
    access_token: &str,
) -> Result<Vec<u8>, CryptoError> {
    let aad = store_token_aad(tenant_slug, domain);
    encrypt_bytes(key, aad.as_bytes(), access_token.as_bytes())
}

/// Decrypt a storefront access token for one tenant/domain pair
pub fn decrypt_store_token(
    key: &CryptoKey,
    tenant_slug: &str,
    domain: &str,
    ciphertext: &[u8],
) -> Result<String, CryptoError> {
    let aad = store_token_aad(tenant_slug, domain);
    let bytes = decrypt_bytes(key, aad.as_bytes(), ciphertext)?;
    String::from_utf8(bytes)
        .map_err(|e| CryptoError::DecryptionFailed(format!("Invalid UTF-8: {}", e)))
}

/// Generates a random URL-safe invitation token.
pub fn generate_invitation_token() -> String {
    let mut bytes = [0u8; INVITATION_TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    let token = base64_url::encode(&bytes);
    bytes.zeroize();
    token
}

/// Hex SHA-256 digest under which a token is stored and looked up.
pub fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> CryptoKey {
        CryptoKey::new(vec![0u8; 32]).expect("valid test key")
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = test_key();
        let encrypted = encrypt_bytes(&key, b"aad", b"secret message").unwrap();
        let decrypted = decrypt_bytes(&key, b"aad", &encrypted).unwrap();

        assert_eq!(decrypted, b"secret message");
    }

    #[test]
    fn test_store_token_is_bound_to_tenant_and_domain() {
        let key = test_key();
        let ciphertext = encrypt_store_token(&key, "acme", "shop1.example", "shpat_123").unwrap();

        assert_eq!(
            decrypt_store_token(&key, "acme", "shop1.example", &ciphertext).unwrap(),
            "shpat_123"
        );
        assert!(decrypt_store_token(&key, "other", "shop1.example", &ciphertext).is_err());
        assert!(decrypt_store_token(&key, "acme", "shop2.example", &ciphertext).is_err());
    }

    #[test]
    fn test_modified_ciphertext_fails() {
        let key = test_key();
        let mut encrypted = encrypt_bytes(&key, b"aad", b"secret message").unwrap();
        encrypted[13] ^= 0x01;

        assert!(decrypt_bytes(&key, b"aad", &encrypted).is_err());
    }

    #[test]
    fn test_nonce_uniqueness() {
        let key = test_key();
        let encrypted1 = encrypt_bytes(&key, b"aad", b"secret").unwrap();
        let encrypted2 = encrypt_bytes(&key, b"aad", b"secret").unwrap();

        // Nonces (bytes 1-13) differ
        assert_ne!(&encrypted1[1..13], &encrypted2[1..13]);
    }

    #[test]
    fn test_unversioned_payload_rejected() {
        let key = test_key();
        let result = decrypt_bytes(&key, b"aad", b"plain-token-without-version");
        assert!(matches!(result, Err(CryptoError::InvalidFormat)));

        let short = vec![VERSION_ENCRYPTED, 0x02];
        assert!(matches!(
            decrypt_bytes(&key, b"aad", &short),
            Err(CryptoError::InvalidFormat)
        ));
    }

    #[test]
    fn test_invalid_key_length_rejected() {
        assert!(matches!(
            CryptoKey::new(vec![0u8; 16]),
            Err(CryptoError::InvalidKeyLength(16))
        ));
        assert!(CryptoKey::new(vec![0u8; 64]).is_err());
    }

    #[test]
    fn test_invitation_tokens_are_unique_and_digestible() {
        let first = generate_invitation_token();
        let second = generate_invitation_token();

        assert_ne!(first, second);
        assert!(!first.contains('+') && !first.contains('/'));
        assert_eq!(token_digest(&first), token_digest(&first));
        assert_eq!(token_digest(&first).len(), 64);
        assert_ne!(token_digest(&first), token_digest(&second));
    }

    #[test]
    fn test_debug_output_redacts_key() {
        assert_eq!(format!("{:?}", test_key()), "CryptoKey([REDACTED])");
    }
}
