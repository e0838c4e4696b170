// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_support::test_config;
use fd_core::{Clock, SystemClock};
use tempfile::tempdir;

fn web_auth() -> WebAuth {
    let dir = tempdir().unwrap();
    WebAuth::new(&test_config(dir.path()), "server-secret")
}

fn now_secs() -> u64 {
    SystemClock.epoch_secs()
}

#[test]
fn issue_then_verify_round_trips_claims() {
    let auth = web_auth();
    let token = auth.issue(&"usr-1".into(), Role::User, now_secs()).unwrap();
    let claims = auth.verify(&token).unwrap();
    assert_eq!(claims.sub, "usr-1");
    assert_eq!(claims.role, Role::User);
    assert_eq!(claims.iss, "fleetd-test");
}

#[test]
fn expired_tokens_map_to_session_expired() {
    let auth = web_auth();
    // Issued far in the past so exp is behind the leeway window.
    let token = auth.issue(&"usr-1".into(), Role::User, now_secs() - 10 * 3600).unwrap();
    assert_eq!(auth.verify(&token), Err(Fault::SessionExpired));
}

#[test]
fn tokens_from_another_secret_are_invalid() {
    let dir = tempdir().unwrap();
    let other = WebAuth::new(&test_config(dir.path()), "different-secret");
    let token = other.issue(&"usr-1".into(), Role::Admin, now_secs()).unwrap();
    assert_eq!(web_auth().verify(&token), Err(Fault::SessionInvalid));
}

#[test]
fn garbage_tokens_are_invalid() {
    assert_eq!(web_auth().verify("not-a-jwt"), Err(Fault::SessionInvalid));
}

#[test]
fn password_hash_verifies_and_rejects() {
    let hash = hash_password("correct horse").unwrap();
    assert_ne!(hash, "correct horse");
    assert!(verify_password("correct horse", &hash));
    assert!(!verify_password("battery staple", &hash));
}

#[test]
fn malformed_stored_hash_rejects() {
    assert!(!verify_password("anything", "not-an-argon2-hash"));
}

#[test]
fn salts_differ_between_hashes() {
    let a = hash_password("same").unwrap();
    let b = hash_password("same").unwrap();
    assert_ne!(a, b);
    assert!(verify_password("same", &a));
    assert!(verify_password("same", &b));
}
