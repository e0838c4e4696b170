// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! DTOs for the REST boundary of the control plane.

use fd_core::{
    BulkJob, Execution, Fault, JobMode, JobStrategy, MachineId, SecurityEventId, TargetSpec,
};
use serde::{Deserialize, Serialize};

/// Body of `POST /jobs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    pub command: String,
    pub mode: JobMode,
    pub target: TargetSpec,
    #[serde(default)]
    pub strategy: JobStrategy,
    /// When true, resolve targets and report without dispatching.
    #[serde(default)]
    pub dry_run: bool,
    /// Re-auth token for commands behind the critical-command gate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reauth_token: Option<String>,
}

/// Response of a dry run: resolved targets partitioned by liveness.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DryRunReport {
    pub total: u32,
    pub offline: u32,
    pub targets: Vec<MachineId>,
}

/// One job with its executions, as returned by `GET /jobs/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    #[serde(flatten)]
    pub job: BulkJob,
    pub executions: Vec<ExecutionView>,
}

/// Execution row as exposed over REST.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionView {
    #[serde(flatten)]
    pub execution: Execution,
}

impl From<Execution> for ExecutionView {
    fn from(execution: Execution) -> Self {
        Self { execution }
    }
}

/// Mirror state returned by `GET /security/cve` and by the trigger endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CveStatusView {
    /// "idle", "running", or "error".
    pub status: String,
    /// Present on trigger responses: whether this call started a sync.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted: Option<bool>,
    #[serde(default)]
    pub cve_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_completed_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Body of `PATCH /vms/{id}/security/resolve` (the partial variant).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolveRequest {
    pub ids: Vec<SecurityEventId>,
}

/// Response of both resolve endpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolveResponse {
    pub resolved: u32,
}

/// Stable error body: `{"kind": "...", "message": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiFault {
    pub kind: String,
    pub message: String,
}

impl From<&Fault> for ApiFault {
    fn from(fault: &Fault) -> Self {
        Self { kind: fault.kind().to_string(), message: fault.to_string() }
    }
}

#[cfg(test)]
#[path = "rest_tests.rs"]
mod tests;
