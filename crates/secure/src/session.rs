// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Terminal session tokens and the critical-command re-auth gate.

use crate::secret::SecretManager;
use crate::sign::hmac_sha256_hex;
use fd_core::{Capability, Fault, MachineId, SessionId, TerminalSession, UserId};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Re-auth tokens are honored for five minutes.
pub const REAUTH_WINDOW_MS: u64 = 5 * 60 * 1000;

/// A minted session token as attached to messages: the session fields plus
/// an HMAC signature under the server-wide secret, so stateless paths can
/// verify it without a store lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedSessionToken {
    #[serde(flatten)]
    pub session: TerminalSession,
    pub signature: String,
}

/// Mints and validates session tokens.
#[derive(Clone)]
pub struct SessionService {
    secrets: SecretManager,
    lifetime_ms: u64,
}

impl SessionService {
    pub fn new(secrets: SecretManager, lifetime_ms: u64) -> Self {
        Self { secrets, lifetime_ms }
    }

    /// Mint a session for one user on one machine.
    pub fn mint(
        &self,
        user_id: UserId,
        machine_id: MachineId,
        capabilities: Vec<Capability>,
        now_ms: u64,
    ) -> SignedSessionToken {
        let session = TerminalSession {
            id: SessionId::new(),
            user_id,
            machine_id,
            capabilities,
            issued_at_ms: now_ms,
            expires_at_ms: now_ms + self.lifetime_ms,
            revoked: false,
        };
        let signature = self.signature_for(&session);
        SignedSessionToken { session, signature }
    }

    /// The HMAC signature for a session under the server secret.
    pub fn signature_for(&self, session: &TerminalSession) -> String {
        let canonical = serde_json::to_string(session).unwrap_or_default();
        hmac_sha256_hex(self.secrets.server_secret(), &canonical)
    }

    /// Stateless verification of a signed token. Revocation is not
    /// checked here; that requires the store.
    pub fn verify_signature(&self, token: &SignedSessionToken) -> bool {
        // Signature covers the session with revoked=false; a flipped flag
        // invalidates it, which is fine: revoked sessions are rejected
        // anyway.
        self.signature_for(&token.session) == token.signature
    }

    /// Validate a stored session for use at `now_ms`.
    pub fn validate(session: &TerminalSession, now_ms: u64) -> Result<(), Fault> {
        if session.revoked {
            return Err(Fault::SessionInvalid);
        }
        if session.is_expired(now_ms) {
            return Err(Fault::SessionExpired);
        }
        Ok(())
    }
}

/// Issued re-auth tokens for the critical-command gate.
#[derive(Debug, Default)]
pub struct ReauthGate {
    tokens: HashMap<String, (UserId, u64)>,
}

impl ReauthGate {
    /// Issue a fresh token for a user who just re-authenticated.
    pub fn issue(&mut self, user_id: UserId, now_ms: u64) -> String {
        let mut raw = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut raw);
        let token = hex::encode(raw);
        self.tokens.insert(token.clone(), (user_id, now_ms));
        token
    }

    /// Check a token for this user, inside the window. Valid tokens are
    /// single-use.
    pub fn check(&mut self, user_id: &UserId, token: &str, now_ms: u64) -> Result<(), Fault> {
        let valid = self
            .tokens
            .get(token)
            .map(|(owner, issued_at)| {
                owner == user_id && now_ms.saturating_sub(*issued_at) < REAUTH_WINDOW_MS
            })
            .unwrap_or(false);
        if !valid {
            return Err(Fault::ReauthRequired);
        }
        self.tokens.remove(token);
        Ok(())
    }

    /// Drop expired tokens.
    pub fn sweep(&mut self, now_ms: u64) {
        self.tokens
            .retain(|_, (_, issued_at)| now_ms.saturating_sub(*issued_at) < REAUTH_WINDOW_MS);
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
