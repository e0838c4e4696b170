// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Target resolution for bulk jobs.
//!
//! Resolution is eager: the execution rows exist before any dispatch
//! happens, so counts and the failure threshold are stable for the whole
//! run.

use fd_core::{
    BulkJob, Execution, Fault, JobId, JobStatus, MachineId, MachineStatus, TargetSpec, UserId,
};
use fd_storage::MaterializedState;
use fd_wire::{CreateJobRequest, DryRunReport};

/// Resolve a target spec to a deduplicated, deterministic machine list.
pub(super) fn resolve(
    state: &MaterializedState,
    target: &TargetSpec,
) -> Result<Vec<MachineId>, Fault> {
    let mut ids = match target {
        TargetSpec::Adhoc { ids } => {
            for id in ids {
                if state.get_machine(id.as_str()).is_none() {
                    return Err(Fault::MachineNotFound);
                }
            }
            ids.clone()
        }
        TargetSpec::Group { name } => state
            .machines
            .values()
            .filter(|m| m.groups.iter().any(|g| g == name))
            .map(|m| m.id)
            .collect(),
        TargetSpec::Dynamic { query } => state
            .machines
            .values()
            .filter(|m| query.matches(m))
            .map(|m| m.id)
            .collect(),
    };

    ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    ids.dedup();
    Ok(ids)
}

/// Resolve targets and partition by liveness, without dispatching.
pub(super) fn dry_run(
    state: &MaterializedState,
    target: &TargetSpec,
) -> Result<DryRunReport, Fault> {
    let targets = resolve(state, target)?;
    let offline = targets
        .iter()
        .filter(|id| {
            state
                .get_machine(id.as_str())
                .map(|m| m.status == MachineStatus::Offline)
                .unwrap_or(true)
        })
        .count() as u32;

    Ok(DryRunReport { total: targets.len() as u32, offline, targets })
}

/// Build the job row and its eager execution rows.
pub(super) fn build_job(
    state: &MaterializedState,
    request: &CreateJobRequest,
    created_by: UserId,
    now_ms: u64,
) -> Result<(BulkJob, Vec<Execution>), Fault> {
    let targets = resolve(state, &request.target)?;

    let job_id = JobId::new();
    let executions: Vec<Execution> =
        targets.iter().map(|machine_id| Execution::pending(job_id, *machine_id)).collect();

    let job = BulkJob {
        id: job_id,
        command: request.command.clone(),
        mode: request.mode,
        target: request.target.clone(),
        strategy: request.strategy,
        status: JobStatus::Pending,
        created_by,
        total_targets: targets.len() as u32,
        created_at_ms: now_ms,
    };

    Ok((job, executions))
}
