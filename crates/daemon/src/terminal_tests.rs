// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::test_support::{
    attach_agent, attach_web, drain_frames, seed_machine, seed_user, test_ctx,
};
use fd_core::test_support::hex_secret;
use fd_core::{Fault, Role, SessionId};
use fd_secure::verify_hmac;
use fd_wire::SecureEnvelope;
use tempfile::tempdir;

fn parse_envelope(text: &str) -> SecureEnvelope {
    serde_json::from_str(text).unwrap()
}

#[tokio::test]
async fn spawn_mints_a_session_and_signs_the_envelope() {
    let dir = tempdir().unwrap();
    let ctx = test_ctx(dir.path());
    let user = seed_user(&ctx, "usr-1", Role::Admin);
    let machine = seed_machine(&ctx, "mch-1", "host-1");
    let mut agent = attach_agent(&ctx, &machine);
    let _web = attach_web(&ctx, "client-1", &user, Role::Admin);

    let session_id = ctx.terminals.spawn("client-1", &user, &machine, 120, 40).unwrap();

    // Session persisted with terminal capabilities only.
    let session = ctx.state.lock().sessions.get(session_id.as_str()).cloned().unwrap();
    assert!(session.grants(fd_core::Capability::TerminalInput));
    assert!(!session.grants(fd_core::Capability::ExecuteCommand));

    // The agent got a signed spawn_terminal envelope.
    let frames = drain_frames(&mut agent);
    assert_eq!(frames.len(), 1);
    let envelope = parse_envelope(&frames[0]);
    assert_eq!(envelope.msg_type, "spawn_terminal");
    assert_eq!(envelope.session_id, session_id.as_str());
    assert!(verify_hmac(&envelope, &hex_secret('a')));
}

#[tokio::test]
async fn viewers_cannot_spawn_terminals() {
    let dir = tempdir().unwrap();
    let ctx = test_ctx(dir.path());
    let viewer = seed_user(&ctx, "usr-v", Role::Viewer);
    let machine = seed_machine(&ctx, "mch-1", "host-1");
    let _agent = attach_agent(&ctx, &machine);

    assert_eq!(
        ctx.terminals.spawn("client-1", &viewer, &machine, 80, 24),
        Err(Fault::ForbiddenRole)
    );
}

#[tokio::test]
async fn non_admins_need_explicit_machine_access() {
    let dir = tempdir().unwrap();
    let ctx = test_ctx(dir.path());
    let operator = seed_user(&ctx, "usr-op", Role::User);
    let machine = seed_machine(&ctx, "mch-1", "host-1");
    let _agent = attach_agent(&ctx, &machine);

    assert_eq!(
        ctx.terminals.spawn("client-1", &operator, &machine, 80, 24),
        Err(Fault::MachineAccessDenied)
    );

    // Granting access makes the same call succeed.
    use fd_engine::EventSink;
    ctx.bus
        .emit(fd_core::Event::MachineAccessGranted { user_id: operator, machine_id: machine })
        .unwrap();
    assert!(ctx.terminals.spawn("client-1", &operator, &machine, 80, 24).is_ok());
}

#[tokio::test]
async fn spawn_requires_a_live_agent() {
    let dir = tempdir().unwrap();
    let ctx = test_ctx(dir.path());
    let user = seed_user(&ctx, "usr-1", Role::Admin);
    let machine = seed_machine(&ctx, "mch-1", "host-1");

    assert_eq!(
        ctx.terminals.spawn("client-1", &user, &machine, 80, 24),
        Err(Fault::AgentDisconnected)
    );
}

#[tokio::test]
async fn input_relays_signed_frames_for_the_owner_only() {
    let dir = tempdir().unwrap();
    let ctx = test_ctx(dir.path());
    let user = seed_user(&ctx, "usr-1", Role::Admin);
    let machine = seed_machine(&ctx, "mch-1", "host-1");
    let mut agent = attach_agent(&ctx, &machine);

    let session_id = ctx.terminals.spawn("client-1", &user, &machine, 80, 24).unwrap();
    drain_frames(&mut agent);

    ctx.terminals.input("client-1", &session_id, "ls\n").unwrap();
    let frames = drain_frames(&mut agent);
    assert_eq!(frames.len(), 1);
    let envelope = parse_envelope(&frames[0]);
    assert_eq!(envelope.msg_type, "terminal_input");
    assert!(verify_hmac(&envelope, &hex_secret('a')));
    let payload: fd_wire::TerminalInputPayload = envelope.payload_as().unwrap();
    assert_eq!(payload.data, "ls\n");

    // Another web client cannot drive this session.
    assert_eq!(
        ctx.terminals.input("client-other", &session_id, "whoami\n"),
        Err(Fault::SessionInvalid)
    );
}

#[tokio::test]
async fn expired_sessions_are_rejected_and_dropped() {
    let dir = tempdir().unwrap();
    let ctx = test_ctx(dir.path());
    let user = seed_user(&ctx, "usr-1", Role::Admin);
    let machine = seed_machine(&ctx, "mch-1", "host-1");
    let mut agent = attach_agent(&ctx, &machine);

    let session_id = ctx.terminals.spawn("client-1", &user, &machine, 80, 24).unwrap();
    drain_frames(&mut agent);

    ctx.clock.advance(std::time::Duration::from_secs(3601));
    assert_eq!(
        ctx.terminals.input("client-1", &session_id, "ls\n"),
        Err(Fault::SessionExpired)
    );
    // The session was revoked on the way out.
    assert!(ctx.state.lock().sessions.get(session_id.as_str()).unwrap().revoked);
}

#[tokio::test]
async fn rate_limit_applies_per_session() {
    let dir = tempdir().unwrap();
    let ctx = test_ctx(dir.path());
    let user = seed_user(&ctx, "usr-1", Role::Admin);
    let machine = seed_machine(&ctx, "mch-1", "host-1");
    let mut agent = attach_agent(&ctx, &machine);

    let session_id = ctx.terminals.spawn("client-1", &user, &machine, 80, 24).unwrap();
    drain_frames(&mut agent);

    // Burst is 200; the 201st keystroke in the same instant is denied.
    for i in 0..200 {
        ctx.terminals
            .input("client-1", &session_id, "x")
            .unwrap_or_else(|e| panic!("keystroke {i} rejected: {e:?}"));
    }
    assert_eq!(
        ctx.terminals.input("client-1", &session_id, "x"),
        Err(Fault::RateLimitExceeded)
    );
}

#[tokio::test]
async fn agent_output_routes_to_the_owning_client() {
    let dir = tempdir().unwrap();
    let ctx = test_ctx(dir.path());
    let user = seed_user(&ctx, "usr-1", Role::Admin);
    let machine = seed_machine(&ctx, "mch-1", "host-1");
    let mut agent = attach_agent(&ctx, &machine);
    let mut owner = attach_web(&ctx, "client-1", &user, Role::Admin);
    let mut other = attach_web(&ctx, "client-2", &user, Role::Admin);

    let session_id = ctx.terminals.spawn("client-1", &user, &machine, 80, 24).unwrap();
    drain_frames(&mut agent);
    drain_frames(&mut owner);
    drain_frames(&mut other);

    ctx.terminals.handle_agent_output(session_id.as_str(), "total 0\n");

    let owner_frames = drain_frames(&mut owner);
    assert_eq!(owner_frames.len(), 1);
    assert!(owner_frames[0].contains("terminal_output"));
    assert!(drain_frames(&mut other).is_empty());
}

#[tokio::test]
async fn web_client_close_revokes_its_sessions() {
    let dir = tempdir().unwrap();
    let ctx = test_ctx(dir.path());
    let user = seed_user(&ctx, "usr-1", Role::Admin);
    let machine = seed_machine(&ctx, "mch-1", "host-1");
    let mut agent = attach_agent(&ctx, &machine);

    let session_id = ctx.terminals.spawn("client-1", &user, &machine, 80, 24).unwrap();
    drain_frames(&mut agent);

    ctx.terminals.close_for_web_client("client-1");
    assert!(ctx.state.lock().sessions.get(session_id.as_str()).unwrap().revoked);
    assert_eq!(
        ctx.terminals.input("client-1", &session_id, "ls\n"),
        Err(Fault::SessionInvalid)
    );
}

#[tokio::test]
async fn agent_close_revokes_machine_sessions() {
    let dir = tempdir().unwrap();
    let ctx = test_ctx(dir.path());
    let user = seed_user(&ctx, "usr-1", Role::Admin);
    let machine = seed_machine(&ctx, "mch-1", "host-1");
    let mut agent = attach_agent(&ctx, &machine);

    let session_id = ctx.terminals.spawn("client-1", &user, &machine, 80, 24).unwrap();
    drain_frames(&mut agent);

    ctx.terminals.close_for_machine(&machine);
    assert!(ctx.state.lock().sessions.get(session_id.as_str()).unwrap().revoked);
}

#[tokio::test]
async fn unknown_session_input_is_invalid() {
    let dir = tempdir().unwrap();
    let ctx = test_ctx(dir.path());
    assert_eq!(
        ctx.terminals.input("client-1", &SessionId::from_string("ses-nope"), "x"),
        Err(Fault::SessionInvalid)
    );
}
