// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::state::{MaterializedState, TRUNCATION_MARKER, OUTPUT_LIMIT_BYTES};
use fd_core::{BulkJob, Event, Execution, ExecutionStatus, JobId, JobStatus};

fn seeded() -> (MaterializedState, Vec<Execution>) {
    let mut state = MaterializedState::default();
    let job = BulkJob::builder().id("job-1").build();
    let executions = vec![
        Execution::pending(JobId::from_string("job-1"), "mch-a".into()),
        Execution::pending(JobId::from_string("job-1"), "mch-b".into()),
    ];
    state.apply_event(&Event::JobCreated { job, executions: executions.clone() });
    (state, executions)
}

#[test]
fn job_created_inserts_job_and_executions() {
    let (state, executions) = seeded();
    assert_eq!(state.jobs.len(), 1);
    assert_eq!(state.executions.len(), 2);
    assert_eq!(state.executions_for_job("job-1").len(), 2);
    for exec in &executions {
        assert!(state.executions.contains_key(exec.id.as_str()));
    }
}

#[test]
fn job_created_is_idempotent() {
    let (mut state, executions) = seeded();
    let job = BulkJob::builder().id("job-1").build();
    state.apply_event(&Event::JobCreated { job, executions });
    assert_eq!(state.jobs.len(), 1);
    assert_eq!(state.executions.len(), 2);
}

#[test]
fn execution_status_cannot_regress() {
    let (mut state, executions) = seeded();
    let id = executions[0].id;

    state.apply_event(&Event::ExecutionStatusChanged {
        id,
        status: ExecutionStatus::Success,
        exit_code: Some(0),
        error: None,
    });
    state.apply_event(&Event::ExecutionStatusChanged {
        id,
        status: ExecutionStatus::Running,
        exit_code: None,
        error: None,
    });

    let row = state.executions.get(id.as_str()).unwrap();
    assert_eq!(row.status, ExecutionStatus::Success);
    assert_eq!(row.exit_code, Some(0));
}

#[test]
fn terminal_execution_status_is_sticky_across_terminal_states() {
    let (mut state, executions) = seeded();
    let id = executions[0].id;

    state.apply_event(&Event::ExecutionStatusChanged {
        id,
        status: ExecutionStatus::Failed,
        exit_code: Some(1),
        error: Some("agent disconnected".into()),
    });
    state.apply_event(&Event::ExecutionStatusChanged {
        id,
        status: ExecutionStatus::Aborted,
        exit_code: None,
        error: None,
    });

    let row = state.executions.get(id.as_str()).unwrap();
    assert_eq!(row.status, ExecutionStatus::Failed);
    assert_eq!(row.error.as_deref(), Some("agent disconnected"));
}

#[test]
fn terminal_job_status_is_final() {
    let (mut state, _) = seeded();
    state.apply_event(&Event::JobStatusChanged {
        id: "job-1".into(),
        status: JobStatus::Aborted,
        at_ms: 1,
    });
    state.apply_event(&Event::JobStatusChanged {
        id: "job-1".into(),
        status: JobStatus::Success,
        at_ms: 2,
    });
    assert_eq!(state.get_job("job-1").unwrap().status, JobStatus::Aborted);
}

#[test]
fn output_for_running_executions_is_appended() {
    let (mut state, executions) = seeded();
    let id = executions[0].id;
    state.apply_event(&Event::ExecutionStatusChanged {
        id,
        status: ExecutionStatus::Running,
        exit_code: None,
        error: None,
    });
    state.apply_event(&Event::ExecutionOutput { id, chunk: "line 1\n".into() });
    state.apply_event(&Event::ExecutionOutput { id, chunk: "line 2\n".into() });
    assert_eq!(state.executions.get(id.as_str()).unwrap().output, "line 1\nline 2\n");
}

#[test]
fn output_after_terminal_state_is_ignored() {
    let (mut state, executions) = seeded();
    let id = executions[0].id;
    state.apply_event(&Event::ExecutionStatusChanged {
        id,
        status: ExecutionStatus::Aborted,
        exit_code: None,
        error: None,
    });
    state.apply_event(&Event::ExecutionOutput { id, chunk: "late output".into() });
    assert!(state.executions.get(id.as_str()).unwrap().output.is_empty());
}

#[test]
fn oversized_output_is_truncated_with_marker() {
    let (mut state, executions) = seeded();
    let id = executions[0].id;
    state.apply_event(&Event::ExecutionStatusChanged {
        id,
        status: ExecutionStatus::Running,
        exit_code: None,
        error: None,
    });
    state.apply_event(&Event::ExecutionOutput {
        id,
        chunk: "z".repeat(OUTPUT_LIMIT_BYTES + 100),
    });

    let output = &state.executions.get(id.as_str()).unwrap().output;
    assert!(output.ends_with(TRUNCATION_MARKER));
    assert!(output.len() <= OUTPUT_LIMIT_BYTES + TRUNCATION_MARKER.len());
}
