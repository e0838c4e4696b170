// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ad-hoc command state transitions.

use super::{append_bounded, MaterializedState};
use fd_core::Event;

pub(super) fn apply(state: &mut MaterializedState, event: &Event) {
    match event {
        Event::CommandCreated { command } => {
            state
                .commands
                .entry(command.id.as_str().to_string())
                .or_insert_with(|| command.clone());
        }

        Event::CommandStatusChanged { id, status, exit_code, dispatched_at_ms } => {
            if let Some(command) = state.commands.get_mut(id.as_str()) {
                // Terminal states never regress on replay.
                if status.rank() < command.status.rank() {
                    return;
                }
                if command.status.is_terminal() && *status != command.status {
                    return;
                }
                command.status = *status;
                if exit_code.is_some() {
                    command.exit_code = *exit_code;
                }
                if dispatched_at_ms.is_some() {
                    command.dispatched_at_ms = *dispatched_at_ms;
                }
            }
        }

        Event::CommandOutput { id, chunk } => {
            if let Some(command) = state.commands.get_mut(id.as_str()) {
                // Late frames for finished commands are dropped; the agent
                // may still emit output after an abort.
                if command.status.is_terminal() {
                    return;
                }
                append_bounded(&mut command.output, chunk);
            }
        }

        _ => {}
    }
}
