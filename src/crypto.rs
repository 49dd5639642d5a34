//! Token encryption module using AES-256-GCM
//!
//! OAuth access and refresh tokens are stored encrypted at rest. Each value is
//! sealed into a versioned envelope (`version | nonce | ciphertext+tag`) and
//! stored as URL-safe base64 text.

#![allow(deprecated)]

use std::sync::OnceLock;

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::config::AppConfig;

const VERSION_ENCRYPTED: u8 = 0x01;
const VERSION_FIELD_LEN: usize = 1;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const MIN_ENCRYPTED_LEN: usize = VERSION_FIELD_LEN + NONCE_LEN + TAG_LEN;

/// Associated data binding every envelope to its purpose.
const TOKEN_AAD: &[u8] = b"bloggy.oauth_token.v1";

/// Process-wide development key, generated on first use.
static DEV_KEY: OnceLock<CryptoKey> = OnceLock::new();

/// Crypto error types
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
    /// Wrong key, tampered data, or a value that is not one of our envelopes.
    #[error("invalid token")]
    InvalidToken,
    #[error("invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("token encryption key is required in production; set OAUTH_TOKEN_ENCRYPTION_KEY")]
    MissingKey,
}

/// Secure wrapper for encryption keys with zeroization
#[derive(Debug, Clone, Zeroize, ZeroizeOnDrop)]
pub struct CryptoKey(Vec<u8>);

impl CryptoKey {
    /// Create a new crypto key from bytes
    pub fn new(bytes: Vec<u8>) -> Result<Self, CryptoError> {
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKeyLength(bytes.len()));
        }
        Ok(CryptoKey(bytes))
    }

    /// Generate a fresh random key
    pub fn generate() -> Self {
        let mut bytes = vec![0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        CryptoKey(bytes)
    }

    /// Get the key as bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Standard base64 form, as accepted by `OAUTH_TOKEN_ENCRYPTION_KEY`.
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.0)
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
    if ciphertext.len() < MIN_ENCRYPTED_LEN || ciphertext[0] != VERSION_ENCRYPTED {
        return Err(CryptoError::InvalidToken);
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
        .map_err(|_| CryptoError::InvalidToken)
}

/// Encrypts and decrypts OAuth tokens for storage.
#[derive(Debug, Clone)]
pub struct TokenCipher {
    key: CryptoKey,
}

impl TokenCipher {
    pub fn new(key: CryptoKey) -> Self {
        Self { key }
    }

    /// Builds the cipher from configuration.
    ///
    /// Outside production a missing key is replaced by a random key generated
    /// once per process. Tokens sealed with it become unreadable after a
    /// restart.
    pub fn from_config(config: &AppConfig) -> Result<Self, CryptoError> {
        match config.token_encryption_key.as_ref() {
            Some(bytes) => Ok(Self::new(CryptoKey::new(bytes.clone())?)),
            None if config.is_production() => Err(CryptoError::MissingKey),
            None => {
                let key = DEV_KEY.get_or_init(|| {
                    tracing::warn!(
                        profile = %config.profile,
                        "OAUTH_TOKEN_ENCRYPTION_KEY not set; using an auto-generated development key"
                    );
                    CryptoKey::generate()
                });
                Ok(Self::new(key.clone()))
            }
        }
    }

    /// Encrypts `token` into an opaque text envelope.
    pub fn encrypt_token(&self, token: &str) -> Result<String, CryptoError> {
        let sealed = encrypt_bytes(&self.key, TOKEN_AAD, token.as_bytes())?;
        Ok(URL_SAFE_NO_PAD.encode(sealed))
    }

    /// Reverses [`TokenCipher::encrypt_token`].
    pub fn decrypt_token(&self, encrypted: &str) -> Result<String, CryptoError> {
        let sealed = URL_SAFE_NO_PAD
            .decode(encrypted.trim())
            .map_err(|_| CryptoError::InvalidToken)?;
        let plaintext = decrypt_bytes(&self.key, TOKEN_AAD, &sealed)?;
        String::from_utf8(plaintext).map_err(|_| CryptoError::InvalidToken)
    }
}
