// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single ad-hoc command path.
//!
//! Interactive commands share the bulk path's envelope, dispatch, and
//! expected-disconnect handling, but live in their own `CommandRecord`
//! rows keyed by the `cmd-` prefix.

use super::{AwaitingReconnect, Orchestrator};
use fd_core::{
    command_policy, Clock, CommandId, CommandRecord, CommandStatus, Event, ExecutionId,
    ExecutionStatus, Fault, MachineId,
};
use tracing::info;

impl<C: Clock + 'static> Orchestrator<C> {
    /// Create and dispatch one ad-hoc command against one machine.
    ///
    /// The critical-command gate is enforced by the caller (it owns the
    /// re-auth context); this path only records, signs, and sends.
    pub async fn run_command(
        &self,
        machine_id: &MachineId,
        command_text: &str,
    ) -> Result<CommandRecord, Fault> {
        let now_ms = self.clock.epoch_ms();
        if self.state.lock().get_machine(machine_id.as_str()).is_none() {
            return Err(Fault::MachineNotFound);
        }

        let record = CommandRecord {
            id: CommandId::new(),
            machine_id: *machine_id,
            command: command_text.to_string(),
            status: CommandStatus::Pending,
            exit_code: None,
            output: String::new(),
            created_at_ms: now_ms,
            dispatched_at_ms: None,
        };
        self.sink.emit(Event::CommandCreated { command: record.clone() })?;

        self.sink.emit(Event::CommandStatusChanged {
            id: record.id,
            status: CommandStatus::Running,
            exit_code: None,
            dispatched_at_ms: Some(now_ms),
        })?;

        if let Err(reason) =
            self.dispatch_work(None, record.id.as_str(), machine_id, command_text).await
        {
            self.sink.emit(Event::CommandStatusChanged {
                id: record.id,
                status: CommandStatus::Failed,
                exit_code: None,
                dispatched_at_ms: None,
            })?;
            info!(command = %record.id, machine = %machine_id, reason, "command dispatch failed");
        }

        let state = self.state.lock();
        Ok(state.commands.get(record.id.as_str()).cloned().unwrap_or(record))
    }

    /// Output frame for an ad-hoc command.
    pub fn handle_command_output(&self, command_id: &CommandId, chunk: &str) -> Result<(), Fault> {
        let terminal = {
            let state = self.state.lock();
            match state.commands.get(command_id.as_str()) {
                Some(command) => command.status.is_terminal(),
                None => return Ok(()),
            }
        };
        if terminal {
            return Ok(());
        }
        self.sink.emit(Event::CommandOutput { id: *command_id, chunk: chunk.to_string() })
    }

    /// Completion frame for an ad-hoc command.
    pub fn handle_command_completed(
        &self,
        command_id: &CommandId,
        exit_code: i32,
    ) -> Result<(), Fault> {
        self.dispatched_at.lock().remove(command_id.as_str());
        self.awaiting_reconnect.lock().remove(command_id.as_str());

        let already_terminal = {
            let state = self.state.lock();
            match state.commands.get(command_id.as_str()) {
                Some(command) => command.status.is_terminal(),
                None => return Ok(()),
            }
        };
        if already_terminal {
            return Ok(());
        }

        let status = if exit_code == 0 { CommandStatus::Success } else { CommandStatus::Failed };
        self.sink.emit(Event::CommandStatusChanged {
            id: *command_id,
            status,
            exit_code: Some(exit_code),
            dispatched_at_ms: None,
        })
    }

    /// Disconnect handling for ad-hoc commands on one machine, mirroring
    /// the execution path's expected-disconnect rule.
    pub(super) fn fail_commands_on_disconnect(
        &self,
        machine_id: &MachineId,
        now_ms: u64,
    ) -> Result<(), Fault> {
        let running: Vec<(CommandId, String)> = {
            let state = self.state.lock();
            state
                .commands
                .values()
                .filter(|c| c.machine_id == *machine_id && c.status == CommandStatus::Running)
                .map(|c| (c.id, c.command.clone()))
                .collect()
        };

        for (command_id, command) in running {
            let dispatched =
                self.dispatched_at.lock().get(command_id.as_str()).copied().unwrap_or(0);
            let within_grace = now_ms.saturating_sub(dispatched) <= self.config.dispatch_grace_ms;

            if command_policy::is_expected_disconnect(&command) && within_grace {
                self.awaiting_reconnect.lock().insert(
                    command_id.as_str().to_string(),
                    AwaitingReconnect {
                        machine_id: *machine_id,
                        job_id: None,
                        deadline_ms: now_ms + self.config.reconnect_grace_ms,
                    },
                );
                continue;
            }

            self.sink.emit(Event::CommandStatusChanged {
                id: command_id,
                status: CommandStatus::Failed,
                exit_code: None,
                dispatched_at_ms: None,
            })?;
        }
        Ok(())
    }

    /// Mark one reconnected reboot-class work item successful, with the
    /// ambiguity surfaced in audit details.
    pub(super) fn complete_reconnected_work(
        &self,
        work_id: &str,
        machine_id: &MachineId,
        now_ms: u64,
    ) -> Result<(), Fault> {
        if work_id.starts_with(ExecutionId::PREFIX) {
            let id = ExecutionId::from_string(work_id);
            let already_terminal = {
                let state = self.state.lock();
                state
                    .executions
                    .get(work_id)
                    .map(|e| e.status.is_terminal())
                    .unwrap_or(true)
            };
            if !already_terminal {
                self.sink.emit(Event::ExecutionStatusChanged {
                    id,
                    status: ExecutionStatus::Success,
                    exit_code: Some(0),
                    error: None,
                })?;
            }
        } else {
            let id = CommandId::from_string(work_id);
            let already_terminal = {
                let state = self.state.lock();
                state
                    .commands
                    .get(work_id)
                    .map(|c| c.status.is_terminal())
                    .unwrap_or(true)
            };
            if !already_terminal {
                self.sink.emit(Event::CommandStatusChanged {
                    id,
                    status: CommandStatus::Success,
                    exit_code: Some(0),
                    dispatched_at_ms: None,
                })?;
            }
        }

        self.sink.audit(
            fd_core::AuditEntry::new(
                fd_core::AuditAction::ExpectedDisconnectAssumedSuccess,
                now_ms,
            )
            .with_machine(*machine_id)
            .with_details(serde_json::json!({
                "work_id": work_id,
                "assumed_success_after_reconnect": true,
            })),
        );
        Ok(())
    }

    /// Fail one work item by ID prefix.
    pub(super) fn fail_work(&self, work_id: &str, reason: &str) -> Result<(), Fault> {
        if work_id.starts_with(ExecutionId::PREFIX) {
            self.sink.emit(Event::ExecutionStatusChanged {
                id: ExecutionId::from_string(work_id),
                status: ExecutionStatus::Failed,
                exit_code: None,
                error: Some(reason.to_string()),
            })
        } else {
            self.sink.emit(Event::CommandStatusChanged {
                id: CommandId::from_string(work_id),
                status: CommandStatus::Failed,
                exit_code: None,
                dispatched_at_ms: None,
            })
        }
    }
}
