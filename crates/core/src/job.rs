// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bulk jobs and their per-target executions.

use crate::machine::{MachineId, MachineQuery};
use crate::user::UserId;
use serde::{Deserialize, Serialize};

crate::define_id! {
    /// Unique identifier for a bulk job.
    pub struct JobId("job-");
}

crate::define_id! {
    /// Unique identifier for one per-target execution of a bulk job.
    pub struct ExecutionId("exe-");
}

/// Execution strategy for a bulk job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobMode {
    /// Up to `concurrency` executions in flight at once.
    Parallel,
    /// Fixed-size waves with `wait_seconds` pauses between them.
    Rolling,
}

crate::simple_display! {
    JobMode {
        Parallel => "parallel",
        Rolling => "rolling",
    }
}

/// How the target machine set is resolved, eagerly, before dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TargetSpec {
    /// Explicit machine IDs.
    Adhoc { ids: Vec<MachineId> },
    /// Named cohort membership lookup.
    Group { name: String },
    /// Structured query over machine fields.
    Dynamic { query: MachineQuery },
}

/// Tunables for a bulk job run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStrategy {
    /// Parallel mode: maximum in-flight executions.
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,
    /// Rolling mode: executions per wave.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// Rolling mode: pause between waves, seconds.
    #[serde(default)]
    pub wait_seconds: u64,
    /// Abort threshold: once failed/total reaches this fraction (0–100),
    /// pending executions are aborted and the job fails.
    #[serde(default = "default_stop_percent")]
    pub stop_on_failure_percent: u32,
}

fn default_concurrency() -> u32 {
    10
}

fn default_batch_size() -> u32 {
    5
}

fn default_stop_percent() -> u32 {
    100
}

impl Default for JobStrategy {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            batch_size: default_batch_size(),
            wait_seconds: 0,
            stop_on_failure_percent: default_stop_percent(),
        }
    }
}

/// Lifecycle of a bulk job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Success,
    Failed,
    Aborted,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failed | JobStatus::Aborted)
    }
}

crate::simple_display! {
    JobStatus {
        Pending => "pending",
        Running => "running",
        Success => "success",
        Failed => "failed",
        Aborted => "aborted",
    }
}

/// A bulk job: one command fanned out to a resolved machine set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkJob {
    pub id: JobId,
    pub command: String,
    pub mode: JobMode,
    pub target: TargetSpec,
    pub strategy: JobStrategy,
    pub status: JobStatus,
    pub created_by: UserId,
    #[serde(default)]
    pub total_targets: u32,
    #[serde(default)]
    pub created_at_ms: u64,
}

/// Per-execution lifecycle. Shares the command ordering invariant:
/// pending → running → {success, failed, aborted}; no regression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Success,
    Failed,
    Aborted,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Success | ExecutionStatus::Failed | ExecutionStatus::Aborted
        )
    }

    /// Rank used to reject regressions (terminal states never move back).
    pub fn rank(&self) -> u8 {
        match self {
            ExecutionStatus::Pending => 0,
            ExecutionStatus::Running => 1,
            ExecutionStatus::Success | ExecutionStatus::Failed | ExecutionStatus::Aborted => 2,
        }
    }
}

crate::simple_display! {
    ExecutionStatus {
        Pending => "pending",
        Running => "running",
        Success => "success",
        Failed => "failed",
        Aborted => "aborted",
    }
}

/// One per-target child of a bulk job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub job_id: JobId,
    pub machine_id: MachineId,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Execution {
    /// Fresh pending execution for one target.
    pub fn pending(job_id: JobId, machine_id: MachineId) -> Self {
        Self {
            id: ExecutionId::new(),
            job_id,
            machine_id,
            status: ExecutionStatus::Pending,
            exit_code: None,
            output: String::new(),
            error: None,
        }
    }
}

crate::builder! {
    pub struct BulkJobBuilder => BulkJob {
        into {
            id: JobId = JobId::from_string("job-test"),
            command: String = "uptime",
            created_by: UserId = UserId::from_string("usr-test"),
        }
        set {
            mode: JobMode = JobMode::Parallel,
            target: TargetSpec = TargetSpec::Adhoc { ids: Vec::new() },
            strategy: JobStrategy = JobStrategy::default(),
            status: JobStatus = JobStatus::Pending,
            total_targets: u32 = 0,
            created_at_ms: u64 = 0,
        }
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
