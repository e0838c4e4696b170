// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ordered verification of secure envelopes.
//!
//! Checks run in a fixed order and fail fast, each mapping to exactly one
//! audit category:
//!
//! 1. `type` present               → MessageMissingType
//! 2. timestamp within ±skew       → ReplayTimestampSkew
//! 3. nonce unseen for the scope   → ReplayNonceSeen
//! 4. session valid for machine    → SessionInvalid / SessionExpired
//! 5. capability granted           → CapabilityMissing
//! 6. token bucket has budget      → RateLimitExceeded
//! 7. constant-time HMAC compare   → HMACFailed
//!
//! Only a fully verified message records its nonce and debits the bucket,
//! so rejected messages never consume replay or rate budget.

use crate::nonce::NonceStore;
use crate::ratelimit::RateLimiter;
use crate::session::SessionService;
use crate::sign::verify_hmac;
use fd_core::{Capability, Fault, TerminalSession};
use fd_wire::SecureEnvelope;

/// Tunables from the environment, with the documented defaults.
#[derive(Debug, Clone, Copy)]
pub struct VerifierConfig {
    pub clock_skew_tolerance_secs: u64,
    pub nonce_history_limit: usize,
    pub rate_limit_tokens_per_sec: f64,
    pub rate_limit_burst: f64,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            clock_skew_tolerance_secs: 30,
            nonce_history_limit: 4096,
            rate_limit_tokens_per_sec: 50.0,
            rate_limit_burst: 200.0,
        }
    }
}

/// Stateful verifier: nonce history plus rate buckets.
pub struct Verifier {
    config: VerifierConfig,
    nonces: NonceStore,
    buckets: RateLimiter,
}

impl Verifier {
    pub fn new(config: VerifierConfig) -> Self {
        // Nonce TTL is twice the skew window: an envelope older than that
        // already fails the timestamp check.
        let ttl_ms = 2 * config.clock_skew_tolerance_secs * 1000;
        Self {
            nonces: NonceStore::new(config.nonce_history_limit, ttl_ms),
            buckets: RateLimiter::new(
                config.rate_limit_tokens_per_sec,
                config.rate_limit_burst,
            ),
            config,
        }
    }

    /// Run the full pipeline for one envelope.
    ///
    /// `session` is the resolved session row for `envelope.session_id`, or
    /// `None` when the lookup failed; `secret_hex` is the machine's
    /// normalized shared secret.
    pub fn verify(
        &mut self,
        envelope: &SecureEnvelope,
        session: Option<&TerminalSession>,
        secret_hex: &str,
        now_ms: u64,
    ) -> Result<(), Fault> {
        // 1. type discriminator
        if envelope.msg_type.is_empty() {
            return Err(Fault::MessageMissingType);
        }

        // 2. clock skew
        let skew_ms = self.config.clock_skew_tolerance_secs * 1000;
        let ts_ms = envelope.timestamp.saturating_mul(1000);
        if ts_ms.abs_diff(now_ms) > skew_ms {
            return Err(Fault::ReplayTimestampSkew);
        }

        // 3. nonce replay
        if self.nonces.seen(&envelope.machine_id, &envelope.session_id, &envelope.nonce, now_ms) {
            return Err(Fault::ReplayNonceSeen);
        }

        // 4. session
        let session = session.ok_or(Fault::SessionInvalid)?;
        if session.id.as_str() != envelope.session_id
            || session.machine_id.as_str() != envelope.machine_id
        {
            return Err(Fault::SessionInvalid);
        }
        SessionService::validate(session, now_ms)?;

        // 5. capability
        if let Some(required) = Capability::required_for(&envelope.msg_type) {
            if !session.grants(required) {
                return Err(Fault::CapabilityMissing);
            }
        }

        // 6. rate limit
        if !self.buckets.check(&envelope.session_id, now_ms) {
            return Err(Fault::RateLimitExceeded);
        }

        // 7. HMAC, constant time
        if !verify_hmac(envelope, secret_hex) {
            return Err(Fault::HmacFailed);
        }

        // Success: record the nonce and debit the bucket.
        self.nonces.record(&envelope.machine_id, &envelope.session_id, &envelope.nonce, now_ms);
        self.buckets.debit(&envelope.session_id, now_ms);
        Ok(())
    }

    /// Release per-session verifier state when a session ends.
    pub fn forget_session(&mut self, machine_id: &str, session_id: &str) {
        self.nonces.forget_session(machine_id, session_id);
        self.buckets.forget_session(session_id);
    }

    /// Periodic maintenance: drop expired nonces and cold buckets.
    pub fn sweep(&mut self, now_ms: u64) {
        self.nonces.sweep(now_ms);
        self.buckets.sweep(now_ms);
    }
}

#[cfg(test)]
#[path = "verify_tests.rs"]
mod tests;
