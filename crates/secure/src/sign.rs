// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HMAC-SHA-256 signing of secure envelopes.
//!
//! The key is the UTF-8 bytes of the normalized 64-hex shared secret. The
//! signed input is [`SecureEnvelope::signing_input`]; comparison is
//! constant-time via the `hmac` crate's tag verification.

use fd_wire::SecureEnvelope;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA-256 of `input` keyed by `key`, hex-encoded.
pub fn hmac_sha256_hex(key: &str, input: &str) -> String {
    let mut mac = match HmacSha256::new_from_slice(key.as_bytes()) {
        Ok(mac) => mac,
        // HMAC accepts keys of any length; unreachable in practice.
        Err(_) => return String::new(),
    };
    mac.update(input.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Sign an envelope in place, filling its `hmac` field.
pub fn sign_envelope(envelope: &mut SecureEnvelope, secret_hex: &str) {
    envelope.hmac = hmac_sha256_hex(secret_hex, &envelope.signing_input());
}

/// Constant-time verification of an envelope's `hmac` field.
pub fn verify_hmac(envelope: &SecureEnvelope, secret_hex: &str) -> bool {
    let mut mac = match HmacSha256::new_from_slice(secret_hex.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(envelope.signing_input().as_bytes());

    let Ok(expected) = hex::decode(&envelope.hmac) else {
        return false;
    };
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
#[path = "sign_tests.rs"]
mod tests;
