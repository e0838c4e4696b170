// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent socket manager.
//!
//! Lifecycle: handshake → registered → active → terminating. The socket
//! must present a `register` frame within the handshake timeout; the
//! shared secret is normalized and compared against the stored hash. An
//! active socket's frames are processed in receive order; outbound
//! messages flow through a writer task fed by the registry.

use crate::ctx::AppCtx;
use crate::registry::{AgentHandle, SocketCommand};
use crate::scan::process_scan;
use axum::extract::ws::{Message, WebSocket};
use fd_core::{
    AuditAction, AuditEntry, Clock, Event, Fault, Machine, MachineId, MachineStatus,
};
use fd_engine::{EventSink, IngestPath};
use fd_secure::SecretManager;
use fd_wire::{parse_agent_frame, AgentFrame, RegisterFrame};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// The register frame must arrive within this window.
const REGISTER_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn handle_agent_socket<C: Clock + 'static>(socket: WebSocket, ctx: Arc<AppCtx<C>>) {
    let (mut writer, mut reader) = socket.split();

    // --- handshake ---
    let register = match read_register_frame(&mut reader).await {
        Ok(frame) => frame,
        Err(fault) => {
            audit_handshake_failure(&ctx, &fault, None);
            let _ = writer.send(close_frame(&fault)).await;
            return;
        }
    };

    let machine_id = MachineId::from_string(&register.machine_id);
    if let Err(fault) = authenticate(&ctx, &machine_id, &register) {
        audit_handshake_failure(&ctx, &fault, Some(&machine_id));
        let _ = writer.send(close_frame(&fault)).await;
        return;
    }

    // --- registered: upsert the row, go online ---
    if let Err(fault) = register_machine(&ctx, &machine_id, &register) {
        let _ = writer.send(close_frame(&fault)).await;
        return;
    }

    // Register the socket; a previous one is superseded and closed.
    let (sender, mut outbound) = mpsc::unbounded_channel::<SocketCommand>();
    let conn_id = ctx.registry.next_conn_id();
    ctx.registry.register_agent(&machine_id, AgentHandle { conn_id, sender });

    // Reboot-class work waiting on this machine resolves now.
    let _ = ctx.orchestrator.handle_agent_reconnect(&machine_id);

    info!(machine = %machine_id, conn = conn_id, "agent active");

    // --- active: relay loop ---
    let close_reason: Option<&'static str> = loop {
        tokio::select! {
            command = outbound.recv() => match command {
                Some(SocketCommand::Send(text)) => {
                    if writer.send(Message::Text(text)).await.is_err() {
                        break None;
                    }
                }
                Some(SocketCommand::Close(reason)) => break Some(reason),
                None => break None,
            },

            incoming = reader.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    // Privileged agent messages travel in the secure
                    // envelope; everything else is a plain frame.
                    let result = if is_signed_envelope(&text) {
                        handle_signed_frame(&ctx, &machine_id, &text)
                    } else {
                        parse_agent_frame(&text)
                            .and_then(|frame| dispatch_frame(&ctx, &machine_id, frame))
                    };
                    match result {
                        Ok(()) => {}
                        Err(fault @ (Fault::MessageMissingType | Fault::MessageMalformed))  => {
                            // Ill-formed frame: close with policy error.
                            ctx.bus.audit(
                                AuditEntry::new(
                                    AuditAction::MessageMissingTypeRejected,
                                    ctx.clock.epoch_ms(),
                                )
                                .with_machine(machine_id)
                                .with_details(serde_json::json!({ "kind": fault.kind() })),
                            );
                            let _ = writer.send(close_frame(&fault)).await;
                            break None;
                        }
                        Err(fault) if is_policy_fault(&fault) => {
                            // Envelope verification failures close the
                            // socket; each class was already audited.
                            let _ = writer.send(close_frame(&fault)).await;
                            break None;
                        }
                        Err(fault) => {
                            debug!(machine = %machine_id, kind = fault.kind(), "frame handling failed");
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break None,
                Some(Ok(_)) => {} // ping/pong/binary ignored
                Some(Err(e)) => {
                    debug!(machine = %machine_id, error = %e, "agent socket error");
                    break None;
                }
            },
        }
    };

    // --- terminating ---
    if let Some(reason) = close_reason {
        let _ = writer
            .send(Message::Close(Some(axum::extract::ws::CloseFrame {
                code: axum::extract::ws::close_code::POLICY,
                reason: reason.into(),
            })))
            .await;
    }

    let still_registered = ctx.registry.unregister_agent(&machine_id, conn_id);
    if still_registered {
        mark_disconnected(&ctx, &machine_id);
    } else {
        // Superseded: the successor owns the machine's liveness now.
        debug!(machine = %machine_id, conn = conn_id, "socket ended after supersession");
    }
}

/// Cheap shape check: signed envelopes carry an `hmac` member.
fn is_signed_envelope(text: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(text)
        .map(|v| v.get("hmac").is_some())
        .unwrap_or(false)
}

/// Whether a fault is one of the envelope policy classes that close the
/// socket.
fn is_policy_fault(fault: &Fault) -> bool {
    matches!(
        fault,
        Fault::ReplayTimestampSkew
            | Fault::ReplayNonceSeen
            | Fault::SessionInvalid
            | Fault::SessionExpired
            | Fault::CapabilityMissing
            | Fault::RateLimitExceeded
            | Fault::HmacFailed
    )
}

/// Run the ordered verification pipeline on a signed inbound message,
/// then route its payload. Each failure class audits distinctly.
fn handle_signed_frame<C: Clock + 'static>(
    ctx: &AppCtx<C>,
    machine_id: &MachineId,
    text: &str,
) -> Result<(), Fault> {
    let envelope: fd_wire::SecureEnvelope =
        serde_json::from_str(text).map_err(|_| Fault::MessageMalformed)?;
    if envelope.machine_id != machine_id.as_str() {
        return Err(Fault::SessionInvalid);
    }

    let now_ms = ctx.clock.epoch_ms();
    let (session, secret_enc) = {
        let state = ctx.state.lock();
        let session = state.sessions.get(envelope.session_id.as_str()).cloned();
        let secret_enc = state
            .get_machine(machine_id.as_str())
            .map(|m| m.secret_enc.clone())
            .ok_or(Fault::MachineNotFound)?;
        (session, secret_enc)
    };
    let secret = ctx.secrets.decrypt_secret(&secret_enc).map_err(|_| Fault::StoreUnavailable)?;

    let verdict =
        ctx.verifier.lock().verify(&envelope, session.as_ref(), &secret, now_ms);
    if let Err(ref fault) = verdict {
        let action = match fault {
            Fault::MessageMissingType => AuditAction::MessageMissingTypeRejected,
            Fault::ReplayTimestampSkew => AuditAction::ReplayTimestampSkew,
            Fault::ReplayNonceSeen => AuditAction::ReplayNonceSeen,
            Fault::SessionInvalid | Fault::SessionExpired => AuditAction::SessionInvalid,
            Fault::CapabilityMissing => AuditAction::CapabilityMissing,
            Fault::RateLimitExceeded => AuditAction::RateLimitExceeded,
            _ => AuditAction::HMACFailed,
        };
        ctx.bus.audit(
            AuditEntry::new(action, now_ms)
                .with_machine(*machine_id)
                .with_details(serde_json::json!({
                    "session_id": envelope.session_id,
                    "type": envelope.msg_type,
                })),
        );
    }
    verdict?;

    // Success traces stay at debug level.
    debug!(machine = %machine_id, r#type = %envelope.msg_type, "signed frame verified");

    // The payload plus the envelope's type form a regular frame.
    let mut payload: serde_json::Value =
        envelope.payload_as().map_err(|_| Fault::MessageMalformed)?;
    let object = payload.as_object_mut().ok_or(Fault::MessageMalformed)?;
    object.insert("type".to_string(), serde_json::Value::String(envelope.msg_type.clone()));
    let frame: AgentFrame =
        serde_json::from_value(payload).map_err(|_| Fault::MessageMalformed)?;
    dispatch_frame(ctx, machine_id, frame)
}

/// Wait for the initial register frame.
async fn read_register_frame(
    reader: &mut futures_util::stream::SplitStream<WebSocket>,
) -> Result<RegisterFrame, Fault> {
    let message = tokio::time::timeout(REGISTER_TIMEOUT, reader.next())
        .await
        .map_err(|_| Fault::MessageMalformed)?
        .ok_or(Fault::MessageMalformed)?
        .map_err(|_| Fault::MessageMalformed)?;

    let Message::Text(text) = message else {
        return Err(Fault::MessageMalformed);
    };
    match parse_agent_frame(&text)? {
        AgentFrame::Register(register) => Ok(register),
        _ => Err(Fault::MessageMalformed),
    }
}

/// Check the presented shared secret against the stored hash.
///
/// First-seen machines are admitted with the secret they present; known
/// machines must match. Legacy (non 64-hex) stored secrets are migrated
/// in place and the agent is forced to re-register against the
/// normalized value.
fn authenticate<C: Clock + 'static>(
    ctx: &AppCtx<C>,
    machine_id: &MachineId,
    register: &RegisterFrame,
) -> Result<(), Fault> {
    let Some(ref provided) = register.secret_key else {
        return Err(Fault::MissingAgentSecret);
    };
    let (normalized, _) = SecretManager::normalize_secret(provided);

    let existing = {
        let state = ctx.state.lock();
        state.get_machine(machine_id.as_str()).cloned()
    };
    let Some(machine) = existing else {
        return Ok(()); // first-seen: admitted, row created by the caller
    };

    // Stored legacy secrets are normalized once, then the agent must
    // come back with a matching key.
    if let Ok(stored_plain) = ctx.secrets.decrypt_secret(&machine.secret_enc) {
        let (stored_normalized, was_legacy) = SecretManager::normalize_secret(&stored_plain);
        if was_legacy {
            let secret_hash = SecretManager::hash_secret(&stored_normalized);
            let secret_enc = ctx
                .secrets
                .encrypt_secret(&stored_normalized)
                .map_err(|_| Fault::StoreUnavailable)?;
            ctx.bus.emit(Event::MachineSecretNormalized {
                id: *machine_id,
                secret_hash,
                secret_enc,
            })?;
            ctx.bus.audit(
                AuditEntry::new(AuditAction::AgentSecretNormalized, ctx.clock.epoch_ms())
                    .with_machine(*machine_id),
            );
            return Err(Fault::InvalidAgentSecret);
        }
    }

    if SecretManager::hash_secret(&normalized) != machine.secret_hash {
        return Err(Fault::InvalidAgentSecret);
    }
    Ok(())
}

/// Upsert the machine row, flip it online, and broadcast.
fn register_machine<C: Clock + 'static>(
    ctx: &AppCtx<C>,
    machine_id: &MachineId,
    register: &RegisterFrame,
) -> Result<(), Fault> {
    let now_ms = ctx.clock.epoch_ms();
    let secret = register.secret_key.as_deref().ok_or(Fault::MissingAgentSecret)?;
    let (normalized, _) = SecretManager::normalize_secret(secret);

    let machine = Machine {
        id: *machine_id,
        hostname: register.hostname.clone(),
        ip: register.ip.clone(),
        os_info: register.os_info.clone(),
        status: MachineStatus::Online,
        secret_hash: SecretManager::hash_secret(&normalized),
        secret_enc: ctx
            .secrets
            .encrypt_secret(&normalized)
            .map_err(|_| Fault::StoreUnavailable)?,
        groups: Vec::new(),
        last_heartbeat_ms: now_ms,
        created_at_ms: now_ms,
    };

    let first_seen = ctx.state.lock().get_machine(machine_id.as_str()).is_none();

    // First-seen machines broadcast new_machine; known machines coming
    // back online refresh quietly and broadcast machine_status_changed.
    if first_seen {
        ctx.bus.emit(Event::MachineRegistered { machine })?;
    } else {
        let mut refreshed = machine;
        if let Some(existing) = ctx.state.lock().get_machine(machine_id.as_str()) {
            refreshed.created_at_ms = existing.created_at_ms;
        }
        ctx.bus.emit(Event::MachineRefreshed { machine: refreshed })?;
    }
    ctx.bus.emit(Event::MachineStatusChanged {
        id: *machine_id,
        status: MachineStatus::Online,
        at_ms: now_ms,
    })?;

    ctx.bus.audit(
        AuditEntry::new(AuditAction::AgentRegistered, now_ms)
            .with_machine(*machine_id)
            .with_details(serde_json::json!({
                "hostname": register.hostname,
                "first_seen": first_seen,
            })),
    );
    Ok(())
}

/// Route one validated frame to its handler.
fn dispatch_frame<C: Clock + 'static>(
    ctx: &AppCtx<C>,
    machine_id: &MachineId,
    frame: AgentFrame,
) -> Result<(), Fault> {
    let now_ms = ctx.clock.epoch_ms();
    match frame {
        AgentFrame::Register(_) => {
            // Already registered on this socket; treat as a liveness nudge.
            ctx.bus.emit(Event::MachineHeartbeat { id: *machine_id, at_ms: now_ms })
        }

        AgentFrame::Heartbeat => {
            ctx.bus.emit(Event::MachineHeartbeat { id: *machine_id, at_ms: now_ms })
        }

        AgentFrame::Metric { mut metric } => {
            metric.recorded_at_ms = now_ms;
            ctx.bus.emit(Event::MetricRecorded { machine_id: *machine_id, metric })
        }

        AgentFrame::Scan { summary, packages, events } => {
            process_scan(ctx, machine_id, summary, packages, events).map(|_| ())
        }

        AgentFrame::ScanProgress { percent, stage } => {
            // Transient: broadcast only, nothing persists.
            ctx.registry.broadcast_web(&fd_wire::WebServerFrame::ScanProgress {
                machine_id: machine_id.as_str().to_string(),
                percent,
                stage,
            });
            Ok(())
        }

        AgentFrame::Event { event } => {
            let _ = ctx.security.ingest(machine_id, &event, IngestPath::Direct)?;
            Ok(())
        }

        AgentFrame::CommandOutput { command_id, chunk } => {
            if command_id.starts_with(fd_core::ExecutionId::PREFIX) {
                ctx.orchestrator.handle_execution_output(&command_id.as_str().into(), &chunk)
            } else {
                ctx.orchestrator.handle_command_output(&command_id.as_str().into(), &chunk)
            }
        }

        AgentFrame::CommandCompleted { command_id, exit_code } => {
            if command_id.starts_with(fd_core::ExecutionId::PREFIX) {
                ctx.orchestrator
                    .handle_execution_completed(&command_id.as_str().into(), exit_code)
            } else {
                ctx.orchestrator.handle_command_completed(&command_id.as_str().into(), exit_code)
            }
        }

        AgentFrame::TerminalOutput { session_id, data } => {
            ctx.terminals.handle_agent_output(&session_id, &data);
            Ok(())
        }

        AgentFrame::TerminalSessionCreated { session_id } => {
            ctx.terminals.handle_session_created(&session_id);
            Ok(())
        }
    }
}

/// Socket loss or grace timeout: go offline, fail in-flight work
/// (modulo expected disconnects), and drop terminal sessions.
pub fn mark_disconnected<C: Clock + 'static>(ctx: &AppCtx<C>, machine_id: &MachineId) {
    let now_ms = ctx.clock.epoch_ms();
    let was_online = ctx
        .state
        .lock()
        .get_machine(machine_id.as_str())
        .map(|m| m.status == MachineStatus::Online)
        .unwrap_or(false);

    if was_online {
        let _ = ctx.bus.emit(Event::MachineStatusChanged {
            id: *machine_id,
            status: MachineStatus::Offline,
            at_ms: now_ms,
        });
    }

    let _ = ctx.orchestrator.handle_agent_disconnect(machine_id);
    ctx.terminals.close_for_machine(machine_id);

    ctx.bus.audit(
        AuditEntry::new(AuditAction::AgentDisconnected, now_ms).with_machine(*machine_id),
    );
    info!(machine = %machine_id, "agent disconnected");
}

fn audit_handshake_failure<C: Clock + 'static>(
    ctx: &AppCtx<C>,
    fault: &Fault,
    machine_id: Option<&MachineId>,
) {
    let action = match fault {
        Fault::MessageMissingType => AuditAction::MessageMissingTypeRejected,
        Fault::MessageMalformed => AuditAction::MessageMalformedRejected,
        _ => AuditAction::AgentAuthFailed,
    };
    let mut entry = AuditEntry::new(action, ctx.clock.epoch_ms())
        .with_details(serde_json::json!({ "kind": fault.kind() }));
    if let Some(machine_id) = machine_id {
        entry = entry.with_machine(*machine_id);
    }
    ctx.bus.audit(entry);
    warn!(kind = fault.kind(), "agent handshake rejected");
}

fn close_frame(fault: &Fault) -> Message {
    Message::Close(Some(axum::extract::ws::CloseFrame {
        code: axum::extract::ws::close_code::POLICY,
        reason: fault.kind().into(),
    }))
}

#[cfg(test)]
#[path = "agent_tests.rs"]
mod tests;
