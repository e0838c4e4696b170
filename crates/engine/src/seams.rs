// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Adapter seams between the engine and the daemon.

use async_trait::async_trait;
use fd_core::{Event, Fault, MachineId};
use fd_wire::SecureEnvelope;

/// Persist one event and fan it out.
///
/// Implementations append to the WAL, apply to materialized state (and the
/// fleet cache) synchronously, and broadcast derived frames to web
/// clients. Engine code may rely on the state reflecting the event as soon
/// as `emit` returns.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event) -> Result<(), Fault>;

    /// Audit convenience: failures here are swallowed by implementations
    /// (an audit-write failure never fails the originating request).
    fn audit(&self, entry: fd_core::AuditEntry) {
        let _ = self.emit(Event::AuditRecorded { entry });
    }
}

/// Deliver signed envelopes to live agent sockets.
#[async_trait]
pub trait Dispatch: Send + Sync {
    /// Send one envelope to the machine's agent. Fails with
    /// [`Fault::AgentDisconnected`] when no socket is live.
    async fn send_envelope(
        &self,
        machine_id: &MachineId,
        envelope: SecureEnvelope,
    ) -> Result<(), Fault>;

    /// Whether the machine currently has a live agent socket.
    fn is_connected(&self, machine_id: &MachineId) -> bool;
}
