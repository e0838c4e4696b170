// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process context harness for daemon tests.

use crate::ctx::AppCtx;
use crate::env::Config;
use crate::registry::{AgentHandle, SocketCommand, WebHandle};
use fd_core::test_support::{hex_secret, online_machine};
use fd_core::{Clock, Event, FakeClock, MachineId, Role, User, UserId};
use fd_engine::EventSink;
use fd_secure::SecretManager;
use fd_storage::{MaterializedState, Wal};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub const SERVER_SECRET: &str = "server-secret-for-tests";

pub fn test_config(state_dir: &Path) -> Config {
    Config {
        bind_host: "127.0.0.1".to_string(),
        port: 0,
        state_dir: state_dir.to_path_buf(),
        log_dir: state_dir.join("logs"),
        jwt_issuer: "fleetd-test".to_string(),
        jwt_audience: "fleetd-test-web".to_string(),
        jwt_expires_in: Duration::from_secs(3600),
        session_token_secret: Some(SERVER_SECRET.to_string()),
        session_expiry: Duration::from_secs(3600),
        rate_limit_tokens_per_sec: 50.0,
        rate_limit_burst_tokens: 200.0,
        clock_skew_tolerance: Duration::from_secs(30),
        nonce_history_limit: 4096,
        cve_sync_interval: Duration::from_secs(7200),
        cve_sync_start_delay: Duration::from_secs(30),
        admin_password: None,
    }
}

/// Build a full context over a temp-dir WAL and a fake clock.
pub fn test_ctx(state_dir: &Path) -> Arc<AppCtx<FakeClock>> {
    let config = test_config(state_dir);
    let wal = Wal::open(&config.wal_path(), 0).unwrap();
    let secrets = SecretManager::from_secret(SERVER_SECRET);
    AppCtx::build(config, FakeClock::new(), wal, MaterializedState::default(), secrets)
}

/// Register a machine row with the canonical test secret.
pub fn seed_machine(ctx: &AppCtx<FakeClock>, id: &str, hostname: &str) -> MachineId {
    let mut machine = online_machine(id, hostname);
    let normalized = hex_secret('a');
    machine.secret_hash = SecretManager::hash_secret(&normalized);
    machine.secret_enc = ctx.secrets.encrypt_secret(&normalized).unwrap();
    machine.last_heartbeat_ms = ctx.clock.epoch_ms();
    ctx.bus.emit(Event::MachineRegistered { machine }).unwrap();
    MachineId::from_string(id)
}

/// Create an active user and return its ID.
pub fn seed_user(ctx: &AppCtx<FakeClock>, id: &str, role: Role) -> UserId {
    let user = User {
        id: UserId::from_string(id),
        username: format!("user-{}", id),
        password_hash: String::new(),
        role,
        active: true,
        created_at_ms: 0,
    };
    ctx.bus.emit(Event::UserCreated { user }).unwrap();
    UserId::from_string(id)
}

/// Attach a fake agent socket and return its command receiver.
pub fn attach_agent(
    ctx: &AppCtx<FakeClock>,
    machine_id: &MachineId,
) -> mpsc::UnboundedReceiver<SocketCommand> {
    let (sender, receiver) = mpsc::unbounded_channel();
    let conn_id = ctx.registry.next_conn_id();
    ctx.registry.register_agent(machine_id, AgentHandle { conn_id, sender });
    receiver
}

/// Attach a fake web client socket and return its command receiver.
pub fn attach_web(
    ctx: &AppCtx<FakeClock>,
    client_id: &str,
    user_id: &UserId,
    role: Role,
) -> mpsc::UnboundedReceiver<SocketCommand> {
    let (sender, receiver) = mpsc::unbounded_channel();
    ctx.registry.register_web(WebHandle {
        client_id: client_id.to_string(),
        user_id: *user_id,
        role,
        sender,
    });
    receiver
}

/// Drain all pending Send commands from a socket receiver.
pub fn drain_frames(receiver: &mut mpsc::UnboundedReceiver<SocketCommand>) -> Vec<String> {
    let mut frames = Vec::new();
    while let Ok(command) = receiver.try_recv() {
        if let SocketCommand::Send(text) = command {
            frames.push(text);
        }
    }
    frames
}
