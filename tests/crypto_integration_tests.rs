//! Integration tests for storefront token encryption and invitation tokens.

use outpost::crypto::{
    CryptoError, CryptoKey, decrypt_store_token, encrypt_store_token, generate_invitation_token,
    token_digest,
};

fn test_crypto_key() -> CryptoKey {
    CryptoKey::new(vec![0u8; 32]).expect("valid test key")
}

#[test]
fn store_token_is_bound_to_tenant_and_domain() {
    let key = test_crypto_key();
    let ciphertext = encrypt_store_token(&key, "acme", "shop.example.com", "shpat_secret").unwrap();

    assert_eq!(
        decrypt_store_token(&key, "acme", "shop.example.com", &ciphertext).unwrap(),
        "shpat_secret"
    );
    assert!(matches!(
        decrypt_store_token(&key, "globex", "shop.example.com", &ciphertext),
        Err(CryptoError::DecryptionFailed(_))
    ));
    assert!(matches!(
        decrypt_store_token(&key, "acme", "other.example.com", &ciphertext),
        Err(CryptoError::DecryptionFailed(_))
    ));
}

#[test]
fn wrong_key_cannot_decrypt() {
    let ciphertext =
        encrypt_store_token(&test_crypto_key(), "acme", "shop.example.com", "shpat_secret").unwrap();
    let other = CryptoKey::new(vec![1u8; 32]).unwrap();

    assert!(decrypt_store_token(&other, "acme", "shop.example.com", &ciphertext).is_err());
}

#[test]
fn same_token_encrypts_differently_each_time() {
    let key = test_crypto_key();
    let a = encrypt_store_token(&key, "acme", "shop.example.com", "shpat_secret").unwrap();
    let b = encrypt_store_token(&key, "acme", "shop.example.com", "shpat_secret").unwrap();

    assert_ne!(a, b);
}

#[test]
fn invitation_tokens_are_unique_and_digested() {
    let first = generate_invitation_token();
    let second = generate_invitation_token();

    assert_ne!(first, second);
    assert!(!first.contains('+') && !first.contains('/'));
    assert_eq!(token_digest(&first), token_digest(&first));
    assert_ne!(token_digest(&first), token_digest(&second));
    assert_eq!(token_digest(&first).len(), 64);
}
