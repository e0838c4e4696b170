// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Web authentication: JWT bearer tokens and password hashing.

use crate::env::Config;
use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, SaltString};
use argon2::{Argon2, PasswordVerifier};
use fd_core::{Fault, Role, UserId};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Validation};
use serde::{Deserialize, Serialize};

/// JWT claims carried by web tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// User ID.
    pub sub: String,
    pub role: Role,
    pub iss: String,
    pub aud: String,
    /// Expiry, seconds since the epoch.
    pub exp: u64,
    /// Issued-at, seconds since the epoch.
    pub iat: u64,
}

/// Issues and validates web tokens with the server secret.
#[derive(Clone)]
pub struct WebAuth {
    issuer: String,
    audience: String,
    expires_in_secs: u64,
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl WebAuth {
    pub fn new(config: &Config, server_secret: &str) -> Self {
        Self {
            issuer: config.jwt_issuer.clone(),
            audience: config.jwt_audience.clone(),
            expires_in_secs: config.jwt_expires_in.as_secs(),
            encoding: EncodingKey::from_secret(server_secret.as_bytes()),
            decoding: DecodingKey::from_secret(server_secret.as_bytes()),
        }
    }

    /// Issue a token for an authenticated user.
    pub fn issue(&self, user_id: &UserId, role: Role, now_secs: u64) -> Result<String, Fault> {
        let claims = Claims {
            sub: user_id.as_str().to_string(),
            role,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            exp: now_secs + self.expires_in_secs,
            iat: now_secs,
        };
        encode(&jsonwebtoken::Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|_| Fault::SessionInvalid)
    }

    /// Validate a bearer token and return its claims.
    pub fn verify(&self, token: &str) -> Result<Claims, Fault> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);

        decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => Fault::SessionExpired,
                _ => Fault::SessionInvalid,
            })
    }
}

/// Hash a password for storage.
pub fn hash_password(password: &str) -> Result<String, Fault> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| Fault::StoreUnavailable)
}

/// Verify a password against its stored hash.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    PasswordHash::new(stored_hash)
        .map(|parsed| {
            Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok()
        })
        .unwrap_or(false)
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
