// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bulk-job and execution state transitions.

use super::{append_bounded, MaterializedState};
use fd_core::Event;

pub(super) fn apply(state: &mut MaterializedState, event: &Event) {
    match event {
        Event::JobCreated { job, executions } => {
            if state.jobs.contains_key(job.id.as_str()) {
                return;
            }
            state.jobs.insert(job.id.as_str().to_string(), job.clone());
            for execution in executions {
                state.executions.insert(execution.id.as_str().to_string(), execution.clone());
            }
        }

        Event::JobStatusChanged { id, status, .. } => {
            if let Some(job) = state.jobs.get_mut(id.as_str()) {
                // Terminal job states are final.
                if job.status.is_terminal() {
                    return;
                }
                job.status = *status;
            }
        }

        Event::ExecutionStatusChanged { id, status, exit_code, error } => {
            if let Some(execution) = state.executions.get_mut(id.as_str()) {
                // pending → running → terminal, no regression.
                if status.rank() < execution.status.rank() {
                    return;
                }
                if execution.status.is_terminal() && *status != execution.status {
                    return;
                }
                execution.status = *status;
                if exit_code.is_some() {
                    execution.exit_code = *exit_code;
                }
                if error.is_some() {
                    execution.error = error.clone();
                }
            }
        }

        Event::ExecutionOutput { id, chunk } => {
            if let Some(execution) = state.executions.get_mut(id.as_str()) {
                // Frames for already-terminal executions are ignored; the
                // agent may keep streaming briefly after an abort.
                if execution.status.is_terminal() {
                    return;
                }
                append_bounded(&mut execution.output, chunk);
            }
        }

        _ => {}
    }
}
