// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    spawn = { "spawn_terminal", Capability::OpenTerminal },
    input = { "terminal_input", Capability::TerminalInput },
    resize = { "terminal_resize", Capability::TerminalResize },
    execute = { "execute_command", Capability::ExecuteCommand },
    cancel = { "cancel_command", Capability::ExecuteCommand },
)]
fn required_capability_per_envelope_type(envelope_type: &str, expected: Capability) {
    assert_eq!(Capability::required_for(envelope_type), Some(expected));
}

#[test]
fn unknown_envelope_types_require_nothing() {
    assert_eq!(Capability::required_for("heartbeat"), None);
    assert_eq!(Capability::required_for(""), None);
}

#[test]
fn terminal_defaults_exclude_execute() {
    let defaults = Capability::terminal_defaults();
    assert!(defaults.contains(&Capability::OpenTerminal));
    assert!(defaults.contains(&Capability::TerminalInput));
    assert!(defaults.contains(&Capability::TerminalResize));
    assert!(!defaults.contains(&Capability::ExecuteCommand));
}

fn session(expires_at_ms: u64) -> TerminalSession {
    TerminalSession {
        id: SessionId::from_string("ses-a"),
        user_id: "usr-a".into(),
        machine_id: "mch-a".into(),
        capabilities: Capability::terminal_defaults(),
        issued_at_ms: 1_000,
        expires_at_ms,
        revoked: false,
    }
}

#[test]
fn expiry_is_inclusive_at_the_boundary() {
    let s = session(5_000);
    assert!(!s.is_expired(4_999));
    assert!(s.is_expired(5_000));
    assert!(s.is_expired(5_001));
}

#[test]
fn grants_checks_the_capability_set() {
    let s = session(5_000);
    assert!(s.grants(Capability::TerminalInput));
    assert!(!s.grants(Capability::ExecuteCommand));
}

#[test]
fn capability_serializes_snake_case() {
    assert_eq!(serde_json::to_string(&Capability::OpenTerminal).unwrap(), "\"open_terminal\"");
    assert_eq!(Capability::ExecuteCommand.to_string(), "execute_command");
}
