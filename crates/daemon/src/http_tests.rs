// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_support::{seed_machine, seed_user, test_ctx};
use axum::http::HeaderValue;
use fd_core::test_support::hex_secret;
use fd_core::SystemClock;
use tempfile::tempdir;

fn headers_with_bearer(token: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        axum::http::header::AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
    );
    headers
}

fn agent_headers(secret: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("x-agent-secret", HeaderValue::from_str(secret).unwrap());
    headers
}

#[test]
fn bearer_token_extraction() {
    assert_eq!(bearer_token(&headers_with_bearer("abc")), Some("abc".to_string()));
    assert_eq!(bearer_token(&HeaderMap::new()), None);
}

#[tokio::test]
async fn authorize_web_accepts_a_valid_token() {
    let dir = tempdir().unwrap();
    let ctx = test_ctx(dir.path());
    let user = seed_user(&ctx, "usr-1", Role::User);
    let token = ctx
        .web_auth
        .issue(&user, Role::User, fd_core::Clock::epoch_secs(&SystemClock))
        .unwrap();

    let (authed, role) = authorize_web(&ctx, &headers_with_bearer(&token)).unwrap();
    assert_eq!(authed, user);
    assert_eq!(role, Role::User);
}

#[tokio::test]
async fn authorize_web_rejects_missing_and_bogus_tokens() {
    let dir = tempdir().unwrap();
    let ctx = test_ctx(dir.path());
    assert!(authorize_web(&ctx, &HeaderMap::new()).is_err());
    assert!(authorize_web(&ctx, &headers_with_bearer("bogus")).is_err());
}

#[tokio::test]
async fn authorize_web_rejects_unknown_users() {
    let dir = tempdir().unwrap();
    let ctx = test_ctx(dir.path());
    // Valid signature, but the user row does not exist.
    let token = ctx
        .web_auth
        .issue(&"usr-ghost".into(), Role::Admin, fd_core::Clock::epoch_secs(&SystemClock))
        .unwrap();
    assert!(authorize_web(&ctx, &headers_with_bearer(&token)).is_err());
}

#[tokio::test]
async fn viewers_fail_the_operator_check() {
    let dir = tempdir().unwrap();
    let ctx = test_ctx(dir.path());
    let viewer = seed_user(&ctx, "usr-v", Role::Viewer);
    assert!(require_operator(&ctx, &viewer, Role::Viewer).is_err());
    let operator = seed_user(&ctx, "usr-o", Role::User);
    assert!(require_operator(&ctx, &operator, Role::User).is_ok());
}

#[tokio::test]
async fn agent_auth_accepts_the_stored_secret() {
    let dir = tempdir().unwrap();
    let ctx = test_ctx(dir.path());
    seed_machine(&ctx, "mch-1", "host-1");

    let ok = authenticate_agent(&ctx, &agent_headers(&hex_secret('a')), "mch-1");
    assert!(ok.is_ok());
}

#[tokio::test]
async fn agent_auth_rejects_wrong_secret_and_unknown_machine() {
    let dir = tempdir().unwrap();
    let ctx = test_ctx(dir.path());
    seed_machine(&ctx, "mch-1", "host-1");

    assert!(authenticate_agent(&ctx, &agent_headers(&hex_secret('b')), "mch-1").is_err());
    assert!(authenticate_agent(&ctx, &agent_headers(&hex_secret('a')), "mch-2").is_err());
    assert!(authenticate_agent(&ctx, &HeaderMap::new(), "mch-1").is_err());
}

#[tokio::test]
async fn agent_auth_applies_secret_normalization() {
    let dir = tempdir().unwrap();
    let ctx = test_ctx(dir.path());

    // Machine stored with the normalized form of a legacy plaintext key.
    let (normalized, was_legacy) =
        fd_secure::SecretManager::normalize_secret("legacy-plaintext-key");
    assert!(was_legacy);
    let mut machine = fd_core::test_support::online_machine("mch-legacy", "host-l");
    machine.secret_hash = fd_secure::SecretManager::hash_secret(&normalized);
    machine.secret_enc = ctx.secrets.encrypt_secret(&normalized).unwrap();
    ctx.bus.emit(fd_core::Event::MachineRegistered { machine }).unwrap();

    // The agent presenting the plaintext key is normalized to the same
    // value and accepted.
    let ok = authenticate_agent(&ctx, &agent_headers("legacy-plaintext-key"), "mch-legacy");
    assert!(ok.is_ok());
}

#[test]
fn agent_actions_map_to_their_stable_kind() {
    assert_eq!(parse_agent_action("AgentDisconnected"), AuditAction::AgentDisconnected);
    assert_eq!(parse_agent_action("TerminalSessionClosed"), AuditAction::TerminalSessionClosed);
    assert_eq!(parse_agent_action("BULK_JOB_CREATED"), AuditAction::BulkJobCreated);
}

#[test]
fn unknown_agent_actions_fall_back_to_agent_reported() {
    assert_eq!(parse_agent_action("SuspiciousProcessTree"), AuditAction::AgentReported);
    assert_eq!(parse_agent_action(""), AuditAction::AgentReported);
}

#[test]
fn api_error_shape() {
    let response = ApiError(Fault::JobNotFound).into_response();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = ApiError(Fault::RateLimitExceeded).into_response();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}
