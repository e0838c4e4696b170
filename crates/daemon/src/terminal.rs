// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Secure terminal service.
//!
//! Mints capability-scoped session tokens for browser terminals, signs
//! every privileged frame to the agent with the machine's shared secret,
//! and enforces session validity, capabilities, and per-session rate
//! limits on the relay path. Each failure class audits distinctly.

use crate::registry::ConnectionRegistry;
use fd_core::{
    AuditAction, AuditEntry, Capability, Clock, Event, Fault, MachineId, SessionId, UserId,
};
use fd_engine::EventSink;
use fd_secure::{sign_envelope, RateLimiter, SecretManager, SessionService};
use fd_storage::MaterializedState;
use fd_wire::{
    SecureEnvelope, SpawnTerminalPayload, TerminalInputPayload, TerminalResizePayload,
    WebServerFrame,
};
use parking_lot::Mutex;
use rand::RngCore;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Where a session's output goes and which agent serves it.
#[derive(Debug, Clone)]
struct TerminalRoute {
    web_client_id: String,
    machine_id: MachineId,
    user_id: UserId,
}

pub struct TerminalService<C: Clock> {
    state: Arc<Mutex<MaterializedState>>,
    sink: Arc<dyn EventSink>,
    registry: Arc<ConnectionRegistry>,
    secrets: SecretManager,
    sessions: SessionService,
    clock: C,
    rate: Mutex<RateLimiter>,
    routes: Mutex<HashMap<String, TerminalRoute>>,
}

impl<C: Clock> TerminalService<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state: Arc<Mutex<MaterializedState>>,
        sink: Arc<dyn EventSink>,
        registry: Arc<ConnectionRegistry>,
        secrets: SecretManager,
        sessions: SessionService,
        clock: C,
        tokens_per_sec: f64,
        burst: f64,
    ) -> Self {
        Self {
            state,
            sink,
            registry,
            secrets,
            sessions,
            clock,
            rate: Mutex::new(RateLimiter::new(tokens_per_sec, burst)),
            routes: Mutex::new(HashMap::new()),
        }
    }

    /// Open a terminal: authorize, mint a session token, and send the
    /// signed `spawn_terminal` envelope to the agent.
    pub fn spawn(
        &self,
        web_client_id: &str,
        user_id: &UserId,
        machine_id: &MachineId,
        cols: u16,
        rows: u16,
    ) -> Result<SessionId, Fault> {
        let now_ms = self.clock.epoch_ms();

        let user = {
            let state = self.state.lock();
            state.users.get(user_id.as_str()).cloned().ok_or(Fault::UserNotFound)?
        };
        if !user.active || !user.role.can_operate() {
            self.sink.audit(
                AuditEntry::new(AuditAction::ForbiddenRole, now_ms)
                    .with_user(*user_id)
                    .with_machine(*machine_id),
            );
            return Err(Fault::ForbiddenRole);
        }
        {
            let state = self.state.lock();
            if state.get_machine(machine_id.as_str()).is_none() {
                return Err(Fault::MachineNotFound);
            }
            if !state.user_can_access(&user, machine_id.as_str()) {
                drop(state);
                self.sink.audit(
                    AuditEntry::new(AuditAction::MachineAccessDenied, now_ms)
                        .with_user(*user_id)
                        .with_machine(*machine_id),
                );
                return Err(Fault::MachineAccessDenied);
            }
        }
        if !self.registry.has_agent(machine_id) {
            return Err(Fault::AgentDisconnected);
        }

        let token =
            self.sessions.mint(*user_id, *machine_id, Capability::terminal_defaults(), now_ms);
        self.sink.emit(Event::SessionIssued { session: token.session.clone() })?;

        let session_id = token.session.id;
        self.routes.lock().insert(
            session_id.as_str().to_string(),
            TerminalRoute {
                web_client_id: web_client_id.to_string(),
                machine_id: *machine_id,
                user_id: *user_id,
            },
        );

        if let Err(fault) = self.send_signed(
            "spawn_terminal",
            &session_id,
            machine_id,
            &SpawnTerminalPayload { cols, rows },
        ) {
            // Agent vanished between the liveness check and the send.
            self.drop_session(&session_id);
            return Err(fault);
        }

        self.sink.audit(
            AuditEntry::new(AuditAction::TerminalSessionOpened, now_ms)
                .with_user(*user_id)
                .with_machine(*machine_id)
                .with_details(serde_json::json!({ "session_id": session_id.as_str() })),
        );
        info!(session = %session_id, machine = %machine_id, "terminal session opened");
        Ok(session_id)
    }

    /// Relay keystrokes into an open session.
    pub fn input(
        &self,
        web_client_id: &str,
        session_id: &SessionId,
        data: &str,
    ) -> Result<(), Fault> {
        let machine_id = self.authorize_relay(
            web_client_id,
            session_id,
            Capability::TerminalInput,
        )?;
        self.send_signed(
            "terminal_input",
            session_id,
            &machine_id,
            &TerminalInputPayload { data: data.to_string() },
        )
    }

    /// Relay a resize into an open session.
    pub fn resize(
        &self,
        web_client_id: &str,
        session_id: &SessionId,
        cols: u16,
        rows: u16,
    ) -> Result<(), Fault> {
        let machine_id = self.authorize_relay(
            web_client_id,
            session_id,
            Capability::TerminalResize,
        )?;
        self.send_signed(
            "terminal_resize",
            session_id,
            &machine_id,
            &TerminalResizePayload { cols, rows },
        )
    }

    /// Shared relay checks, in the envelope verification order: session,
    /// capability, then rate limit. Every failure class audits.
    fn authorize_relay(
        &self,
        web_client_id: &str,
        session_id: &SessionId,
        capability: Capability,
    ) -> Result<MachineId, Fault> {
        let now_ms = self.clock.epoch_ms();

        let route = self
            .routes
            .lock()
            .get(session_id.as_str())
            .filter(|r| r.web_client_id == web_client_id)
            .cloned();
        let Some(route) = route else {
            self.audit_failure(AuditAction::SessionInvalid, session_id, None, now_ms);
            return Err(Fault::SessionInvalid);
        };

        let session = {
            let state = self.state.lock();
            state.sessions.get(session_id.as_str()).cloned()
        };
        let Some(session) = session else {
            self.audit_failure(AuditAction::SessionInvalid, session_id, Some(&route), now_ms);
            return Err(Fault::SessionInvalid);
        };
        if let Err(fault) = SessionService::validate(&session, now_ms) {
            self.audit_failure(AuditAction::SessionInvalid, session_id, Some(&route), now_ms);
            self.drop_session(session_id);
            return Err(fault);
        }

        if !session.grants(capability) {
            self.audit_failure(AuditAction::CapabilityMissing, session_id, Some(&route), now_ms);
            return Err(Fault::CapabilityMissing);
        }

        {
            let mut rate = self.rate.lock();
            if !rate.check(session_id.as_str(), now_ms) {
                drop(rate);
                self.audit_failure(
                    AuditAction::RateLimitExceeded,
                    session_id,
                    Some(&route),
                    now_ms,
                );
                return Err(Fault::RateLimitExceeded);
            }
            rate.debit(session_id.as_str(), now_ms);
        }

        Ok(route.machine_id)
    }

    fn audit_failure(
        &self,
        action: AuditAction,
        session_id: &SessionId,
        route: Option<&TerminalRoute>,
        now_ms: u64,
    ) {
        let mut entry = AuditEntry::new(action, now_ms)
            .with_details(serde_json::json!({ "session_id": session_id.as_str() }));
        if let Some(route) = route {
            entry = entry.with_machine(route.machine_id).with_user(route.user_id);
        }
        self.sink.audit(entry);
    }

    /// Sign one envelope with the machine secret and push it down the
    /// agent socket.
    fn send_signed<P: serde::Serialize>(
        &self,
        msg_type: &str,
        session_id: &SessionId,
        machine_id: &MachineId,
        payload: &P,
    ) -> Result<(), Fault> {
        let secret_enc = {
            let state = self.state.lock();
            state
                .get_machine(machine_id.as_str())
                .map(|m| m.secret_enc.clone())
                .ok_or(Fault::MachineNotFound)?
        };
        let secret = self.secrets.decrypt_secret(&secret_enc).map_err(|_| Fault::StoreUnavailable)?;

        let mut envelope = SecureEnvelope::for_payload(
            msg_type,
            session_id.as_str(),
            machine_id.as_str(),
            payload,
            fresh_nonce(),
            self.clock.epoch_secs(),
        )
        .map_err(|_| Fault::MessageMalformed)?;
        sign_envelope(&mut envelope, &secret);

        let text = serde_json::to_string(&envelope).map_err(|_| Fault::MessageMalformed)?;
        self.registry.send_agent_text(machine_id, text)
    }

    // --- agent-side frames ---

    /// Route terminal output to the owning web client.
    pub fn handle_agent_output(&self, session_id: &str, data: &str) {
        let route = self.routes.lock().get(session_id).cloned();
        if let Some(route) = route {
            self.registry.send_web(
                &route.web_client_id,
                &WebServerFrame::TerminalOutput {
                    session_id: session_id.to_string(),
                    data: data.to_string(),
                },
            );
        }
    }

    /// The agent acknowledged the spawned session.
    pub fn handle_session_created(&self, session_id: &str) {
        let route = self.routes.lock().get(session_id).cloned();
        if let Some(route) = route {
            self.registry.send_web(
                &route.web_client_id,
                &WebServerFrame::TerminalSessionCreated {
                    session_id: session_id.to_string(),
                    machine_id: route.machine_id.as_str().to_string(),
                },
            );
        }
    }

    // --- cancellation ---

    /// Web socket closed: revoke everything it owned.
    pub fn close_for_web_client(&self, web_client_id: &str) {
        let sessions: Vec<String> = self
            .routes
            .lock()
            .iter()
            .filter(|(_, r)| r.web_client_id == web_client_id)
            .map(|(id, _)| id.clone())
            .collect();
        for session_id in sessions {
            self.drop_session(&SessionId::from_string(&session_id));
        }
    }

    /// Agent socket closed: revoke sessions bound to the machine.
    pub fn close_for_machine(&self, machine_id: &MachineId) {
        let sessions: Vec<String> = self
            .routes
            .lock()
            .iter()
            .filter(|(_, r)| r.machine_id == *machine_id)
            .map(|(id, _)| id.clone())
            .collect();
        for session_id in sessions {
            self.drop_session(&SessionId::from_string(&session_id));
        }
    }

    /// Periodic maintenance: expire sessions past their lifetime and
    /// evict cold rate buckets.
    pub fn sweep(&self) {
        let now_ms = self.clock.epoch_ms();
        let expired: Vec<String> = {
            let state = self.state.lock();
            let routes = self.routes.lock();
            routes
                .keys()
                .filter(|id| {
                    state
                        .sessions
                        .get(id.as_str())
                        .map(|s| s.is_expired(now_ms))
                        .unwrap_or(true)
                })
                .cloned()
                .collect()
        };
        for session_id in expired {
            self.drop_session(&SessionId::from_string(&session_id));
        }
        self.rate.lock().sweep(now_ms);
    }

    fn drop_session(&self, session_id: &SessionId) {
        let removed = self.routes.lock().remove(session_id.as_str());
        if let Some(route) = removed {
            let _ = self.sink.emit(Event::SessionRevoked { id: *session_id });
            self.rate.lock().forget_session(session_id.as_str());
            self.sink.audit(
                AuditEntry::new(AuditAction::TerminalSessionClosed, self.clock.epoch_ms())
                    .with_user(route.user_id)
                    .with_machine(route.machine_id)
                    .with_details(serde_json::json!({ "session_id": session_id.as_str() })),
            );
        } else {
            warn!(session = %session_id, "dropping unknown terminal session");
        }
    }
}

/// Random 128-bit nonce, hex-encoded.
fn fresh_nonce() -> String {
    let mut raw = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut raw);
    hex::encode(raw)
}

#[cfg(test)]
#[path = "terminal_tests.rs"]
mod tests;
