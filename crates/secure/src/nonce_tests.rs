// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn store() -> NonceStore {
    NonceStore::new(4, 60_000)
}

#[test]
fn fresh_nonce_is_not_seen() {
    let mut s = store();
    assert!(!s.seen("mch-a", "ses-1", "n1", 0));
}

#[test]
fn recorded_nonce_is_seen_until_expiry() {
    let mut s = store();
    s.record("mch-a", "ses-1", "n1", 0);
    assert!(s.seen("mch-a", "ses-1", "n1", 1_000));
    assert!(s.seen("mch-a", "ses-1", "n1", 59_999));
    assert!(!s.seen("mch-a", "ses-1", "n1", 60_000));
}

#[test]
fn scopes_are_isolated() {
    let mut s = store();
    s.record("mch-a", "ses-1", "n1", 0);
    assert!(!s.seen("mch-a", "ses-2", "n1", 0));
    assert!(!s.seen("mch-b", "ses-1", "n1", 0));
}

#[test]
fn fifo_bound_evicts_oldest() {
    let mut s = store();
    for i in 0..6 {
        s.record("mch-a", "ses-1", &format!("n{}", i), 0);
    }
    assert_eq!(s.scope_len("mch-a", "ses-1"), 4);
    // Oldest two were evicted and can be recorded again.
    assert!(!s.seen("mch-a", "ses-1", "n0", 0));
    assert!(!s.seen("mch-a", "ses-1", "n1", 0));
    assert!(s.seen("mch-a", "ses-1", "n5", 0));
}

#[test]
fn record_is_idempotent() {
    let mut s = store();
    s.record("mch-a", "ses-1", "n1", 0);
    s.record("mch-a", "ses-1", "n1", 0);
    assert_eq!(s.scope_len("mch-a", "ses-1"), 1);
}

#[test]
fn forget_session_clears_the_scope() {
    let mut s = store();
    s.record("mch-a", "ses-1", "n1", 0);
    s.forget_session("mch-a", "ses-1");
    assert!(!s.seen("mch-a", "ses-1", "n1", 0));
}

#[test]
fn sweep_drops_fully_expired_scopes() {
    let mut s = store();
    s.record("mch-a", "ses-1", "n1", 0);
    s.record("mch-b", "ses-2", "n2", 50_000);
    s.sweep(60_000);
    assert_eq!(s.scope_len("mch-a", "ses-1"), 0);
    assert_eq!(s.scope_len("mch-b", "ses-2"), 1);
}
