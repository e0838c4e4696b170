// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

#[test]
fn failed_auth_fingerprint_uses_source_ip() {
    let fp = fingerprint("failed_auth", "ssh failure", &json!({"source_ip": "10.0.0.5"}));
    assert_eq!(fp, "failed_auth:10.0.0.5");
}

#[test]
fn integrity_fingerprint_uses_path() {
    let fp = fingerprint("integrity", "changed", &json!({"path": "/etc/passwd"}));
    assert_eq!(fp, "integrity:/etc/passwd");
}

#[test]
fn drift_fingerprint_prefers_target_path() {
    let fp = fingerprint("drift", "config drift", &json!({"targetPath": "/etc/nginx"}));
    assert_eq!(fp, "drift:/etc/nginx");
}

#[test]
fn drift_fingerprint_falls_back_to_message() {
    let fp = fingerprint("drift", "config drift", &json!({}));
    assert_eq!(fp, "drift:config drift");
}

#[test]
fn other_kinds_use_type_and_message() {
    let fp = fingerprint("vulnerability", "4 vulnerable packages", &json!({}));
    assert_eq!(fp, "vulnerability:4 vulnerable packages");
}

#[test]
fn missing_fields_produce_empty_suffix() {
    assert_eq!(fingerprint("failed_auth", "x", &json!({})), "failed_auth:");
    assert_eq!(fingerprint("integrity", "x", &json!({})), "integrity:");
}

#[test]
fn resolved_is_the_only_resolved_status() {
    assert!(SecurityEventStatus::Resolved.is_resolved());
    assert!(!SecurityEventStatus::Open.is_resolved());
    assert!(!SecurityEventStatus::Ack.is_resolved());
}
