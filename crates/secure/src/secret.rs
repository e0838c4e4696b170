// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Server and per-machine secret material.
//!
//! The server-wide secret is generated once and persisted with owner-only
//! permissions. Per-machine shared secrets are normalized to 64 hex
//! characters (legacy plaintext keys go through SHA-256 once, on first
//! contact), stored AES-256-GCM encrypted with a key derived from the
//! server secret, and hashed for lookup.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::path::Path;
use thiserror::Error;
use tracing::info;

/// Length of a normalized shared secret: SHA-256 as lowercase hex.
pub const NORMALIZED_SECRET_LEN: usize = 64;

/// AES-GCM nonce size in bytes.
const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("secret file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("stored secret ciphertext is malformed")]
    MalformedCiphertext,

    #[error("secret decryption failed")]
    Decrypt,

    #[error("secret encryption failed")]
    Encrypt,
}

/// Holds the server secret and derives everything else from it.
///
/// Loaded once at boot; the derived encryption key stays in memory and is
/// used only immediately before signing or verification.
#[derive(Clone)]
pub struct SecretManager {
    server_secret: String,
    /// SHA-256 of the server secret; the AES-256 key for secrets at rest.
    encryption_key: [u8; 32],
}

impl SecretManager {
    /// Construct from an explicit server secret (env-provided).
    pub fn from_secret(server_secret: impl Into<String>) -> Self {
        let server_secret = server_secret.into();
        let encryption_key = sha256_bytes(server_secret.as_bytes());
        Self { server_secret, encryption_key }
    }

    /// Load the persisted server secret, generating one on first boot.
    pub fn load_or_generate(path: &Path) -> Result<Self, SecretError> {
        if let Ok(existing) = std::fs::read_to_string(path) {
            let trimmed = existing.trim();
            if !trimmed.is_empty() {
                return Ok(Self::from_secret(trimmed));
            }
        }

        let mut raw = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut raw);
        let secret = hex::encode(raw);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, &secret)?;
        restrict_permissions(path)?;
        info!(path = %path.display(), "generated server secret");

        Ok(Self::from_secret(secret))
    }

    /// The raw server secret, used to sign session tokens.
    pub fn server_secret(&self) -> &str {
        &self.server_secret
    }

    /// Normalize a shared secret to its canonical 64-hex form.
    ///
    /// Returns `(normalized, was_legacy)`. The migration is idempotent:
    /// already-normalized input passes through unchanged.
    pub fn normalize_secret(raw: &str) -> (String, bool) {
        let trimmed = raw.trim();
        if trimmed.len() == NORMALIZED_SECRET_LEN
            && trimmed.chars().all(|c| c.is_ascii_hexdigit())
        {
            return (trimmed.to_ascii_lowercase(), false);
        }
        (hex::encode(sha256_bytes(trimmed.as_bytes())), true)
    }

    /// Lookup hash of a normalized secret.
    pub fn hash_secret(normalized: &str) -> String {
        hex::encode(sha256_bytes(normalized.as_bytes()))
    }

    /// Encrypt a normalized secret for storage.
    ///
    /// Output is base64 of `nonce || ciphertext+tag`, one fresh nonce per
    /// value.
    pub fn encrypt_secret(&self, normalized: &str) -> Result<String, SecretError> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.encryption_key));
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, normalized.as_bytes())
            .map_err(|_| SecretError::Encrypt)?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(combined))
    }

    /// Decrypt a stored secret. The GCM tag authenticates the value; any
    /// tamper maps to the single opaque `Decrypt` error.
    pub fn decrypt_secret(&self, stored: &str) -> Result<String, SecretError> {
        let combined = BASE64.decode(stored).map_err(|_| SecretError::MalformedCiphertext)?;
        if combined.len() <= NONCE_LEN {
            return Err(SecretError::MalformedCiphertext);
        }
        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.encryption_key));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| SecretError::Decrypt)?;

        String::from_utf8(plaintext).map_err(|_| SecretError::Decrypt)
    }
}

fn sha256_bytes(input: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(input);
    hasher.finalize().into()
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
#[path = "secret_tests.rs"]
mod tests;
