// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Heartbeat liveness monitor.
//!
//! Agents heartbeat every ≤30 s; absence for more than the liveness
//! window flips the machine offline and closes any hung socket. The
//! monitor also runs the periodic sweeps (terminal sessions, reconnect
//! deadlines).

use crate::ctx::AppCtx;
use crate::sockets::agent::mark_disconnected;
use fd_core::{Clock, MachineId, MachineStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Missing heartbeats for longer than this flips a machine offline.
pub const LIVENESS_WINDOW_MS: u64 = 90_000;

/// Monitor cadence.
const CHECK_INTERVAL: Duration = Duration::from_secs(15);

pub async fn run<C: Clock + 'static>(ctx: Arc<AppCtx<C>>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(CHECK_INTERVAL) => {}
            _ = cancel.cancelled() => return,
        }
        check_once(&ctx);
    }
}

/// One liveness pass. Split out so tests can drive it directly.
pub fn check_once<C: Clock + 'static>(ctx: &AppCtx<C>) {
    let now_ms = ctx.clock.epoch_ms();

    let stale: Vec<MachineId> = {
        let state = ctx.state.lock();
        state
            .machines
            .values()
            .filter(|m| {
                m.status == MachineStatus::Online
                    && now_ms.saturating_sub(m.last_heartbeat_ms) > LIVENESS_WINDOW_MS
            })
            .map(|m| m.id)
            .collect()
    };

    for machine_id in stale {
        warn!(machine = %machine_id, "heartbeat lost, marking offline");
        // A hung socket may still be registered; close it so the write
        // side notices too.
        ctx.registry.close_agent(&machine_id, "heartbeat timeout");
        mark_disconnected(ctx, &machine_id);
    }

    // Periodic maintenance piggybacks on the monitor cadence.
    ctx.terminals.sweep();
    ctx.verifier.lock().sweep(now_ms);
    let _ = ctx.orchestrator.sweep_reconnect_deadlines();
    ctx.bus.maybe_flush();
}

#[cfg(test)]
#[path = "heartbeat_tests.rs"]
mod tests;
