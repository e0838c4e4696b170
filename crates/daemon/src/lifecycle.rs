// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon startup, reconciliation, and shutdown.

use crate::auth::hash_password;
use crate::ctx::AppCtx;
use crate::env::Config;
use fd_core::{
    Clock, Event, ExecutionStatus, MachineStatus, Role, SystemClock, User, UserId,
};
use fd_engine::EventSink;
use fd_secure::SecretManager;
use fd_storage::{load_snapshot, save_snapshot, MaterializedState, Wal};
use fs2::FileExt;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Snapshot cadence while running.
const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("I/O error during startup: {0}")]
    Io(#[from] std::io::Error),

    #[error("another fleetd instance holds the lock: {0}")]
    LockFailed(std::io::Error),

    #[error("store error during startup: {0}")]
    Wal(#[from] fd_storage::WalError),

    #[error("snapshot error during startup: {0}")]
    Snapshot(#[from] fd_storage::SnapshotError),

    #[error("secret initialization failed: {0}")]
    Secret(#[from] fd_secure::SecretError),

    #[error("listen address unusable")]
    Bind(#[source] std::io::Error),
}

/// A started daemon: context plus the resources shutdown needs.
pub struct Daemon {
    pub ctx: Arc<AppCtx<SystemClock>>,
    pub cancel: CancellationToken,
    // Held for the process lifetime; releases the lock on drop.
    _lock_file: std::fs::File,
}

/// Bring the daemon up: lock, recover state, reconcile, wire the
/// component graph.
pub fn startup(config: Config) -> Result<Daemon, LifecycleError> {
    std::fs::create_dir_all(&config.state_dir)?;
    std::fs::create_dir_all(&config.log_dir)?;

    // Lock first; everything after this owns the state directory.
    // OpenOptions avoids truncating a running daemon's PID before the
    // lock is actually held.
    let lock_file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(config.lock_path())?;
    lock_file.try_lock_exclusive().map_err(LifecycleError::LockFailed)?;
    let mut lock_file = lock_file;
    lock_file.set_len(0)?;
    writeln!(lock_file, "{}", std::process::id())?;

    std::fs::write(config.version_path(), env!("CARGO_PKG_VERSION"))?;

    // Server secret: env override or generated-and-persisted.
    let secrets = match config.session_token_secret {
        Some(ref secret) => SecretManager::from_secret(secret.clone()),
        None => SecretManager::load_or_generate(&config.secret_path())?,
    };

    // Recover state: snapshot, then WAL replay.
    let (mut state, processed_seq) = match load_snapshot(&config.snapshot_path())? {
        Some(snapshot) => {
            info!(
                seq = snapshot.seq,
                machines = snapshot.state.machines.len(),
                jobs = snapshot.state.jobs.len(),
                "loaded snapshot"
            );
            (snapshot.state, snapshot.seq)
        }
        None => {
            info!("no snapshot found, starting with empty state");
            (MaterializedState::default(), 0)
        }
    };

    let wal = Wal::open(&config.wal_path(), processed_seq)?;
    let replay = wal.entries_after(processed_seq);
    let replay_count = replay.len();
    for entry in replay {
        state.apply_event(&entry.event);
    }
    if replay_count > 0 {
        info!(count = replay_count, after_seq = processed_seq, "replayed WAL events");
    }

    let ctx = AppCtx::build(config, SystemClock, wal, state, secrets);
    reconcile(&ctx);
    seed_admin(&ctx);

    Ok(Daemon { ctx, cancel: CancellationToken::new(), _lock_file: lock_file })
}

/// Crash-recovery reconciliation: nothing was live across the restart.
fn reconcile<C: Clock + 'static>(ctx: &AppCtx<C>) {
    let now_ms = ctx.clock.epoch_ms();

    let (online, running_execs, open_sessions) = {
        let state = ctx.state.lock();
        let online: Vec<fd_core::MachineId> = state
            .machines
            .values()
            .filter(|m| m.status == MachineStatus::Online)
            .map(|m| m.id)
            .collect();
        let running: Vec<fd_core::ExecutionId> = state
            .executions
            .values()
            .filter(|e| !e.status.is_terminal())
            .map(|e| e.id)
            .collect();
        let sessions: Vec<fd_core::SessionId> = state
            .sessions
            .values()
            .filter(|s| !s.revoked)
            .map(|s| s.id)
            .collect();
        (online, running, sessions)
    };

    for machine_id in &online {
        let _ = ctx.bus.emit(Event::MachineStatusChanged {
            id: *machine_id,
            status: MachineStatus::Offline,
            at_ms: now_ms,
        });
    }
    for execution_id in &running_execs {
        let _ = ctx.bus.emit(Event::ExecutionStatusChanged {
            id: *execution_id,
            status: ExecutionStatus::Failed,
            exit_code: None,
            error: Some("server restarted".to_string()),
        });
    }
    for session_id in &open_sessions {
        let _ = ctx.bus.emit(Event::SessionRevoked { id: *session_id });
    }

    // Jobs left non-terminal have no runner anymore; their executions
    // just failed above, so settle the job rows too.
    let stuck_jobs: Vec<fd_core::JobId> = {
        let state = ctx.state.lock();
        state.jobs.values().filter(|j| !j.status.is_terminal()).map(|j| j.id).collect()
    };
    for job_id in &stuck_jobs {
        let _ = ctx.bus.emit(Event::JobStatusChanged {
            id: *job_id,
            status: fd_core::JobStatus::Failed,
            at_ms: now_ms,
        });
    }

    if !online.is_empty() || !running_execs.is_empty() || !stuck_jobs.is_empty() {
        info!(
            machines = online.len(),
            executions = running_execs.len(),
            jobs = stuck_jobs.len(),
            sessions = open_sessions.len(),
            "reconciled state after restart"
        );
    }
}

/// Seed the admin account on an empty store so the web surface is
/// reachable on first boot.
fn seed_admin<C: Clock + 'static>(ctx: &AppCtx<C>) {
    if !ctx.state.lock().users.is_empty() {
        return;
    }
    let Some(ref password) = ctx.config.admin_password else {
        warn!("no users and FLEETD_ADMIN_PASSWORD unset; web surface has no accounts");
        return;
    };
    let Ok(password_hash) = hash_password(password) else {
        error!("admin password hashing failed");
        return;
    };
    let user = User {
        id: UserId::new(),
        username: "admin".to_string(),
        password_hash,
        role: Role::Admin,
        active: true,
        created_at_ms: ctx.clock.epoch_ms(),
    };
    let _ = ctx.bus.emit(Event::UserCreated { user });
    info!("seeded admin user");
}

/// Run the daemon until ctrl-c / SIGTERM, then drain.
pub async fn run(daemon: Daemon) -> Result<(), LifecycleError> {
    let Daemon { ctx, cancel, _lock_file } = daemon;

    let listener = tokio::net::TcpListener::bind((
        ctx.config.bind_host.as_str(),
        ctx.config.port,
    ))
    .await
    .map_err(LifecycleError::Bind)?;
    info!(host = %ctx.config.bind_host, port = ctx.config.port, "listening");

    // Background tasks.
    tokio::spawn(crate::heartbeat::run(Arc::clone(&ctx), cancel.clone()));
    tokio::spawn(Arc::clone(&ctx.mirror).run_schedule(cancel.clone()));
    tokio::spawn(snapshotter(Arc::clone(&ctx), cancel.clone()));

    let router = crate::http::router(Arc::clone(&ctx));
    let server = axum::serve(listener, router).with_graceful_shutdown({
        let cancel = cancel.clone();
        async move { cancel.cancelled().await }
    });

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                error!(error = %e, "server error");
            }
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received");
            cancel.cancel();
        }
    }

    // Drain: one final durable snapshot.
    let _ = ctx.bus.emit(Event::Shutdown);
    ctx.bus.flush();
    snapshot_now(&ctx);
    info!("fleetd stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            Ok(term) => term,
            Err(_) => return ctrl_c.await.unwrap_or(()),
        };
        tokio::select! {
            _ = ctrl_c => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}

/// Periodic snapshots bound WAL replay time; the covered prefix is
/// truncated afterwards.
async fn snapshotter<C: Clock + 'static>(ctx: Arc<AppCtx<C>>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(SNAPSHOT_INTERVAL) => {}
            _ = cancel.cancelled() => return,
        }
        snapshot_now(&ctx);
    }
}

fn snapshot_now<C: Clock + 'static>(ctx: &AppCtx<C>) {
    let seq = ctx.bus.write_seq();
    let state = ctx.state.lock().clone();
    match save_snapshot(&ctx.config.snapshot_path(), &state, seq) {
        Ok(()) => {
            ctx.bus.mark_processed(seq);
            ctx.bus.truncate_before(seq + 1);
            info!(seq, "snapshot written");
        }
        Err(e) => error!(error = %e, "snapshot failed"),
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
