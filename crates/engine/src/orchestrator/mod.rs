// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bulk-job orchestrator.
//!
//! `create_job` resolves targets eagerly, persists the job with its
//! executions, and spawns a runner task that drives the chosen strategy.
//! Agents report progress through `handle_command_output` and
//! `handle_command_completed`; the runner observes state and advances.

mod command;
mod runner;
mod targets;

use crate::seams::{Dispatch, EventSink};
use fd_core::{
    command_policy, AuditAction, AuditEntry, Clock, Event, ExecutionId, ExecutionStatus, Fault,
    JobId, MachineId, SessionId, UserId,
};
use fd_secure::{sign_envelope, SecretManager, SessionService};
use fd_storage::MaterializedState;
use fd_wire::{CreateJobRequest, ExecuteCommandPayload, JobView, SecureEnvelope};
use parking_lot::Mutex;
use rand::RngCore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{info, warn};

/// The user ID commands dispatched by the orchestrator run as.
pub const SYSTEM_USER: &str = "usr-system";

/// Orchestrator tunables (defaults match the documented timeouts).
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    /// Kill-switch grace: running executions get this long to ack a
    /// cancel before being forced to aborted.
    pub kill_grace_ms: u64,
    /// Expected-disconnect window: socket loss within this span of
    /// dispatch is not a failure for reboot-class commands.
    pub dispatch_grace_ms: u64,
    /// Reconnect window: an agent returning within this span marks the
    /// pending reboot-class execution successful.
    pub reconnect_grace_ms: u64,
    /// Runner wake-up tick.
    pub poll_interval_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            kill_grace_ms: 30_000,
            dispatch_grace_ms: 10_000,
            reconnect_grace_ms: 5 * 60 * 1000,
            poll_interval_ms: 250,
        }
    }
}

/// Per-running-job bookkeeping shared with the runner task.
struct JobHandle {
    abort: Arc<AtomicBool>,
    notify: Arc<Notify>,
    /// System sessions minted for dispatches; revoked when the job ends.
    sessions: Vec<SessionId>,
}

/// A work item whose agent disconnected after a reboot-class command.
struct AwaitingReconnect {
    machine_id: MachineId,
    job_id: Option<JobId>,
    deadline_ms: u64,
}

pub struct Orchestrator<C: Clock> {
    state: Arc<Mutex<MaterializedState>>,
    sink: Arc<dyn EventSink>,
    dispatch: Arc<dyn Dispatch>,
    secrets: SecretManager,
    sessions: SessionService,
    clock: C,
    config: OrchestratorConfig,
    jobs: Mutex<HashMap<String, JobHandle>>,
    /// Dispatch timestamps per work item (execution or command).
    dispatched_at: Mutex<HashMap<String, u64>>,
    awaiting_reconnect: Mutex<HashMap<String, AwaitingReconnect>>,
}

impl<C: Clock + 'static> Orchestrator<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state: Arc<Mutex<MaterializedState>>,
        sink: Arc<dyn EventSink>,
        dispatch: Arc<dyn Dispatch>,
        secrets: SecretManager,
        sessions: SessionService,
        clock: C,
        config: OrchestratorConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            state,
            sink,
            dispatch,
            secrets,
            sessions,
            clock,
            config,
            jobs: Mutex::new(HashMap::new()),
            dispatched_at: Mutex::new(HashMap::new()),
            awaiting_reconnect: Mutex::new(HashMap::new()),
        })
    }

    /// Create a bulk job and start its runner. Targets are resolved
    /// eagerly; the returned job already owns its execution rows.
    pub fn create_job(
        self: &Arc<Self>,
        request: &CreateJobRequest,
        created_by: UserId,
    ) -> Result<fd_core::BulkJob, Fault> {
        let now_ms = self.clock.epoch_ms();
        let (job, executions) = targets::build_job(
            &self.state.lock(),
            request,
            created_by,
            now_ms,
        )?;

        self.sink.emit(Event::JobCreated { job: job.clone(), executions })?;
        self.sink.audit(
            AuditEntry::new(AuditAction::BulkJobCreated, now_ms)
                .with_user(created_by)
                .with_details(serde_json::json!({
                    "job_id": job.id.as_str(),
                    "command": job.command,
                    "mode": job.mode.to_string(),
                    "total_targets": job.total_targets,
                })),
        );

        let handle = JobHandle {
            abort: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
            sessions: Vec::new(),
        };
        self.jobs.lock().insert(job.id.as_str().to_string(), handle);

        let this = Arc::clone(self);
        let job_id = job.id;
        tokio::spawn(async move {
            this.run_job(job_id).await;
        });

        info!(job = %job.id, targets = job.total_targets, mode = %job.mode, "bulk job created");
        Ok(job)
    }

    /// Resolve targets and report without dispatching. Dry runs do not
    /// audit.
    pub fn dry_run(&self, request: &CreateJobRequest) -> Result<fd_wire::DryRunReport, Fault> {
        targets::dry_run(&self.state.lock(), &request.target)
    }

    /// Kill switch: abort a job. Pending executions abort immediately;
    /// running ones get a best-effort cancel and the grace window.
    pub fn abort_job(&self, job_id: &JobId, requested_by: Option<UserId>) -> Result<(), Fault> {
        let now_ms = self.clock.epoch_ms();
        let job = self
            .state
            .lock()
            .get_job(job_id.as_str())
            .cloned()
            .ok_or(Fault::JobNotFound)?;

        if job.status.is_terminal() {
            return Ok(());
        }

        let mut entry = AuditEntry::new(AuditAction::BulkJobAborted, now_ms)
            .with_details(serde_json::json!({ "job_id": job_id.as_str() }));
        if let Some(user) = requested_by {
            entry = entry.with_user(user);
        }
        self.sink.audit(entry);

        if let Some(handle) = self.jobs.lock().get(job_id.as_str()) {
            handle.abort.store(true, Ordering::SeqCst);
            handle.notify.notify_waiters();
            return Ok(());
        }

        // No live runner (e.g. created before a restart): finalize inline.
        self.finalize_abort_without_runner(job_id)?;
        Ok(())
    }

    /// Jobs newest-first, optionally filtered by creator.
    pub fn list_jobs(&self, limit: usize, created_by: Option<&UserId>) -> Vec<fd_core::BulkJob> {
        let state = self.state.lock();
        let mut jobs: Vec<fd_core::BulkJob> = state
            .jobs
            .values()
            .filter(|j| created_by.map(|u| j.created_by == *u).unwrap_or(true))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at_ms.cmp(&a.created_at_ms));
        jobs.truncate(limit);
        jobs
    }

    /// One job with its executions.
    pub fn get_job(&self, job_id: &JobId) -> Option<JobView> {
        let state = self.state.lock();
        let job = state.get_job(job_id.as_str())?.clone();
        let executions = state
            .executions_for_job(job_id.as_str())
            .into_iter()
            .cloned()
            .map(Into::into)
            .collect();
        Some(JobView { job, executions })
    }

    // --- agent-facing entry points (called by the connection manager) ---

    /// Streamed output for one execution. Frames for executions already in
    /// a terminal state are ignored.
    pub fn handle_execution_output(
        &self,
        execution_id: &ExecutionId,
        chunk: &str,
    ) -> Result<(), Fault> {
        let terminal = {
            let state = self.state.lock();
            match state.executions.get(execution_id.as_str()) {
                Some(exec) => exec.status.is_terminal(),
                None => return Ok(()),
            }
        };
        if terminal {
            return Ok(());
        }
        self.sink.emit(Event::ExecutionOutput { id: *execution_id, chunk: chunk.to_string() })
    }

    /// Completion for one execution. A final completion for an
    /// already-terminal execution is accepted to release bookkeeping but
    /// does not change status.
    pub fn handle_execution_completed(
        &self,
        execution_id: &ExecutionId,
        exit_code: i32,
    ) -> Result<(), Fault> {
        self.dispatched_at.lock().remove(execution_id.as_str());
        self.awaiting_reconnect.lock().remove(execution_id.as_str());

        let (job_id, already_terminal) = {
            let state = self.state.lock();
            match state.executions.get(execution_id.as_str()) {
                Some(exec) => (exec.job_id, exec.status.is_terminal()),
                None => return Ok(()),
            }
        };

        if !already_terminal {
            // A completion that acks a kill-switched job counts as the
            // cancel ack, not as a success.
            let aborting = self
                .jobs
                .lock()
                .get(job_id.as_str())
                .map(|h| h.abort.load(Ordering::SeqCst))
                .unwrap_or(false);
            let status = if aborting {
                ExecutionStatus::Aborted
            } else if exit_code == 0 {
                ExecutionStatus::Success
            } else {
                ExecutionStatus::Failed
            };
            let error = (!aborting && exit_code != 0).then(|| format!("exit code {}", exit_code));
            self.sink.emit(Event::ExecutionStatusChanged {
                id: *execution_id,
                status,
                exit_code: Some(exit_code),
                error,
            })?;
        }

        self.notify_job(&job_id);
        Ok(())
    }

    /// Agent socket loss. In-flight work on the machine fails with
    /// "agent disconnected" unless the command is reboot-class and was
    /// dispatched within the grace window.
    pub fn handle_agent_disconnect(&self, machine_id: &MachineId) -> Result<(), Fault> {
        let now_ms = self.clock.epoch_ms();
        let running: Vec<(ExecutionId, JobId, String)> = {
            let state = self.state.lock();
            state
                .executions
                .values()
                .filter(|e| e.machine_id == *machine_id && e.status == ExecutionStatus::Running)
                .filter_map(|e| {
                    state
                        .get_job(e.job_id.as_str())
                        .map(|job| (e.id, e.job_id, job.command.clone()))
                })
                .collect()
        };

        for (execution_id, job_id, command) in running {
            let dispatched =
                self.dispatched_at.lock().get(execution_id.as_str()).copied().unwrap_or(0);
            let within_grace = now_ms.saturating_sub(dispatched) <= self.config.dispatch_grace_ms;

            if command_policy::is_expected_disconnect(&command) && within_grace {
                self.awaiting_reconnect.lock().insert(
                    execution_id.as_str().to_string(),
                    AwaitingReconnect {
                        machine_id: *machine_id,
                        job_id: Some(job_id),
                        deadline_ms: now_ms + self.config.reconnect_grace_ms,
                    },
                );
                info!(execution = %execution_id, "expected disconnect, awaiting reconnect");
                continue;
            }

            self.sink.emit(Event::ExecutionStatusChanged {
                id: execution_id,
                status: ExecutionStatus::Failed,
                exit_code: None,
                error: Some("agent disconnected".to_string()),
            })?;
            self.notify_job(&job_id);
        }

        self.fail_commands_on_disconnect(machine_id, now_ms)?;
        Ok(())
    }

    /// Agent re-registration. Reboot-class work waiting on this machine
    /// inside the reconnect window is marked successful.
    pub fn handle_agent_reconnect(&self, machine_id: &MachineId) -> Result<(), Fault> {
        let now_ms = self.clock.epoch_ms();
        let due: Vec<(String, Option<JobId>)> = {
            let mut awaiting = self.awaiting_reconnect.lock();
            let keys: Vec<String> = awaiting
                .iter()
                .filter(|(_, a)| a.machine_id == *machine_id && now_ms <= a.deadline_ms)
                .map(|(k, _)| k.clone())
                .collect();
            keys.into_iter()
                .filter_map(|k| awaiting.remove(&k).map(|a| (k, a.job_id)))
                .collect()
        };

        for (work_id, job_id) in due {
            self.complete_reconnected_work(&work_id, machine_id, now_ms)?;
            if let Some(job_id) = job_id {
                self.notify_job(&job_id);
            }
        }
        Ok(())
    }

    /// Expire reconnect expectations whose window closed. Called from
    /// runner ticks and the daemon's housekeeping loop.
    pub fn sweep_reconnect_deadlines(&self) -> Result<(), Fault> {
        let now_ms = self.clock.epoch_ms();
        let expired: Vec<(String, Option<JobId>)> = {
            let mut awaiting = self.awaiting_reconnect.lock();
            let keys: Vec<String> = awaiting
                .iter()
                .filter(|(_, a)| now_ms > a.deadline_ms)
                .map(|(k, _)| k.clone())
                .collect();
            keys.into_iter()
                .filter_map(|k| awaiting.remove(&k).map(|a| (k, a.job_id)))
                .collect()
        };

        for (work_id, job_id) in expired {
            warn!(work = %work_id, "agent did not reconnect inside the grace window");
            self.fail_work(&work_id, "agent did not reconnect")?;
            if let Some(job_id) = job_id {
                self.notify_job(&job_id);
            }
        }
        Ok(())
    }

    // --- internals shared by the runner ---

    fn notify_job(&self, job_id: &JobId) {
        if let Some(handle) = self.jobs.lock().get(job_id.as_str()) {
            handle.notify.notify_waiters();
        }
    }

    /// Mint a system session for one dispatch, sign and send the execute
    /// envelope. Returns an error description on failure.
    async fn dispatch_work(
        &self,
        job_id: Option<&JobId>,
        work_id: &str,
        machine_id: &MachineId,
        command: &str,
    ) -> Result<(), String> {
        let now_ms = self.clock.epoch_ms();

        let secret_enc = {
            let state = self.state.lock();
            match state.get_machine(machine_id.as_str()) {
                Some(machine) => machine.secret_enc.clone(),
                None => return Err("machine not found".to_string()),
            }
        };
        let secret = self
            .secrets
            .decrypt_secret(&secret_enc)
            .map_err(|_| "machine secret unavailable".to_string())?;

        let token = self.sessions.mint(
            UserId::from_string(SYSTEM_USER),
            *machine_id,
            vec![fd_core::Capability::ExecuteCommand],
            now_ms,
        );
        let _ = self.sink.emit(Event::SessionIssued { session: token.session.clone() });
        if let Some(job_id) = job_id {
            if let Some(handle) = self.jobs.lock().get_mut(job_id.as_str()) {
                handle.sessions.push(token.session.id);
            }
        }

        let payload =
            ExecuteCommandPayload { command_id: work_id.to_string(), command: command.to_string() };
        let mut envelope = SecureEnvelope::for_payload(
            "execute_command",
            token.session.id.as_str(),
            machine_id.as_str(),
            &payload,
            fresh_nonce(),
            self.clock.epoch_secs(),
        )
        .map_err(|_| "envelope serialization failed".to_string())?;
        sign_envelope(&mut envelope, &secret);

        self.dispatched_at.lock().insert(work_id.to_string(), now_ms);

        self.dispatch
            .send_envelope(machine_id, envelope)
            .await
            .map_err(|_| "agent disconnected".to_string())
    }

    /// Best-effort cancel envelope for one running work item.
    async fn send_cancel(&self, machine_id: &MachineId, work_id: &str) {
        let secret_enc = {
            let state = self.state.lock();
            match state.get_machine(machine_id.as_str()) {
                Some(machine) => machine.secret_enc.clone(),
                None => return,
            }
        };
        let Ok(secret) = self.secrets.decrypt_secret(&secret_enc) else {
            return;
        };

        let token = self.sessions.mint(
            UserId::from_string(SYSTEM_USER),
            *machine_id,
            vec![fd_core::Capability::ExecuteCommand],
            self.clock.epoch_ms(),
        );
        let _ = self.sink.emit(Event::SessionIssued { session: token.session.clone() });

        let payload = fd_wire::CancelCommandPayload { command_id: work_id.to_string() };
        let Ok(mut envelope) = SecureEnvelope::for_payload(
            "cancel_command",
            token.session.id.as_str(),
            machine_id.as_str(),
            &payload,
            fresh_nonce(),
            self.clock.epoch_secs(),
        ) else {
            return;
        };
        sign_envelope(&mut envelope, &secret);

        if self.dispatch.send_envelope(machine_id, envelope).await.is_err() {
            warn!(machine = %machine_id, work = %work_id, "cancel envelope undeliverable");
        }
    }

    /// Revoke system sessions and drop the runner handle.
    fn release_job(&self, job_id: &JobId) {
        if let Some(handle) = self.jobs.lock().remove(job_id.as_str()) {
            for session_id in handle.sessions {
                let _ = self.sink.emit(Event::SessionRevoked { id: session_id });
            }
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
#[path = "../orchestrator_tests/mod.rs"]
mod tests;
