// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! fd-secure: secret management and envelope verification for fleetd.
//!
//! Holds the server-wide signing secret, the per-machine shared secrets
//! (encrypted at rest, hashed for lookup), and the verification pipeline
//! for the secure envelope: timestamp skew, nonce replay, session and
//! capability checks, rate limiting, and constant-time HMAC comparison.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod nonce;
mod ratelimit;
mod secret;
mod session;
mod sign;
mod verify;

pub use nonce::NonceStore;
pub use ratelimit::RateLimiter;
pub use secret::{SecretError, SecretManager, NORMALIZED_SECRET_LEN};
pub use session::{ReauthGate, SessionService, SignedSessionToken, REAUTH_WINDOW_MS};
pub use sign::{hmac_sha256_hex, sign_envelope, verify_hmac};
pub use verify::{VerifierConfig, Verifier};
