// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn envelope() -> SecureEnvelope {
    SecureEnvelope::for_payload(
        "terminal_input",
        "ses-abc",
        "mch-1",
        &TerminalInputPayload { data: "ls -la\n".into() },
        "nonce-1",
        1_700_000_000,
    )
    .unwrap()
}

#[test]
fn signing_input_is_the_canonical_json_string() {
    let input = envelope().signing_input();
    assert_eq!(
        input,
        r#"{"type":"terminal_input","sessionId":"ses-abc","machineId":"mch-1","payload":{"data":"ls -la\n"},"nonce":"nonce-1","timestamp":1700000000}"#
    );
}

#[test]
fn payload_text_is_preserved_verbatim_through_deserialization() {
    // A verifier must recompute the HMAC over the payload exactly as it
    // arrived: unusual key order and interior spacing must survive.
    let raw = r#"{"type":"execute_command","sessionId":"s","machineId":"m",
        "payload":{"command":"uptime",  "commandId":"cmd-9"},
        "nonce":"n","timestamp":5,"hmac":"aa"}"#;
    let env: SecureEnvelope = serde_json::from_str(raw).unwrap();
    assert_eq!(env.payload.get(), r#"{"command":"uptime",  "commandId":"cmd-9"}"#);
    assert!(env
        .signing_input()
        .contains(r#""payload":{"command":"uptime",  "commandId":"cmd-9"}"#));
}

#[test]
fn signing_input_escapes_string_fields() {
    let env = SecureEnvelope::unsigned(
        "terminal_input",
        "ses-\"quoted\"",
        "mch-1",
        "{}".to_string(),
        "n",
        1,
    )
    .unwrap();
    assert!(env.signing_input().contains(r#""sessionId":"ses-\"quoted\"""#));
}

#[test]
fn unsigned_rejects_invalid_payload_json() {
    let err = SecureEnvelope::unsigned("t", "s", "m", "{not json".to_string(), "n", 1);
    assert!(matches!(err, Err(EnvelopeError::InvalidPayload(_))));
}

#[test]
fn envelope_round_trips_with_hmac_field() {
    let mut env = envelope();
    env.hmac = "deadbeef".to_string();
    let json = serde_json::to_string(&env).unwrap();
    let back: SecureEnvelope = serde_json::from_str(&json).unwrap();
    assert_eq!(back.hmac, "deadbeef");
    assert_eq!(back.signing_input(), env.signing_input());
}

#[test]
fn missing_hmac_defaults_to_empty() {
    let raw = r#"{"type":"t","sessionId":"s","machineId":"m","payload":{},"nonce":"n","timestamp":1}"#;
    let env: SecureEnvelope = serde_json::from_str(raw).unwrap();
    assert!(env.hmac.is_empty());
}

#[test]
fn payload_as_decodes_typed_payloads() {
    let env = envelope();
    let payload: TerminalInputPayload = env.payload_as().unwrap();
    assert_eq!(payload.data, "ls -la\n");
}

#[test]
fn resize_payload_round_trip() {
    let env = SecureEnvelope::for_payload(
        "terminal_resize",
        "s",
        "m",
        &TerminalResizePayload { cols: 120, rows: 40 },
        "n",
        1,
    )
    .unwrap();
    let payload: TerminalResizePayload = env.payload_as().unwrap();
    assert_eq!(payload, TerminalResizePayload { cols: 120, rows: 40 });
}
