// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persisted events for the fleetd store.
//!
//! Every durable mutation is one event appended to the WAL; materialized
//! state is derived by replay. Serializes with `{"type": "entity:verb", ...}`.
//! Unknown type tags deserialize to `Custom` for forward compatibility.

use crate::audit::AuditEntry;
use crate::command::{CommandId, CommandRecord, CommandStatus};
use crate::cve::{CveRecord, VulnerabilityMatch};
use crate::job::{BulkJob, Execution, ExecutionId, ExecutionStatus, JobId, JobStatus};
use crate::machine::{Machine, MachineId, MachineStatus};
use crate::metric::MetricSnapshot;
use crate::package::{Package, PackageScan};
use crate::security::{SecurityEvent, SecurityEventId};
use crate::session::{SessionId, TerminalSession};
use crate::user::{User, UserId};
use serde::{Deserialize, Serialize};

/// Counters recorded when a CVE sync finishes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CveSyncStats {
    pub fetched: u32,
    pub upserted: u32,
    pub pages: u32,
    pub duration_ms: u64,
    /// (ecosystem name, record count) pairs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub per_ecosystem: Vec<(String, u32)>,
    #[serde(default)]
    pub completed_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Events that mutate persisted state.
///
/// # Idempotency Requirement
///
/// All replay handlers MUST be idempotent: applying the same event twice
/// must produce the same state as applying it once (events are applied both
/// on the live path and again during WAL replay after a crash).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    // -- machine --
    /// First-seen registration.
    #[serde(rename = "machine:registered")]
    MachineRegistered { machine: Machine },

    /// Re-registration of a known machine: identity fields refresh
    /// without a new-machine announcement.
    #[serde(rename = "machine:refreshed")]
    MachineRefreshed { machine: Machine },

    #[serde(rename = "machine:status_changed")]
    MachineStatusChanged { id: MachineId, status: MachineStatus, at_ms: u64 },

    #[serde(rename = "machine:heartbeat")]
    MachineHeartbeat { id: MachineId, at_ms: u64 },

    /// Legacy plaintext secret replaced by its normalized 64-hex form.
    #[serde(rename = "machine:secret_normalized")]
    MachineSecretNormalized { id: MachineId, secret_hash: String, secret_enc: String },

    #[serde(rename = "machine:group_assigned")]
    MachineGroupAssigned { id: MachineId, group: String },

    #[serde(rename = "machine:group_unassigned")]
    MachineGroupUnassigned { id: MachineId, group: String },

    // -- metric --
    #[serde(rename = "metric:recorded")]
    MetricRecorded { machine_id: MachineId, metric: MetricSnapshot },

    // -- command --
    #[serde(rename = "command:created")]
    CommandCreated { command: CommandRecord },

    #[serde(rename = "command:status_changed")]
    CommandStatusChanged {
        id: CommandId,
        status: CommandStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dispatched_at_ms: Option<u64>,
    },

    #[serde(rename = "command:output")]
    CommandOutput { id: CommandId, chunk: String },

    // -- scan / packages --
    /// One scan applied as a single batch: upsert every listed package,
    /// then delete packages absent from a non-empty scan.
    #[serde(rename = "scan:applied")]
    ScanApplied { scan: PackageScan, packages: Vec<Package> },

    // -- cve --
    /// One page of mirrored records, upserted by upstream ID.
    #[serde(rename = "cve:synced")]
    CveSynced { records: Vec<CveRecord> },

    #[serde(rename = "cve:sync_completed")]
    CveSyncCompleted { stats: CveSyncStats },

    /// Full recompute of one machine's matches after a scan.
    #[serde(rename = "vuln:recomputed")]
    VulnerabilityMatchesRecomputed { machine_id: MachineId, matches: Vec<VulnerabilityMatch> },

    // -- security events --
    /// Insert or in-place update decided by the dedup engine.
    #[serde(rename = "security:upserted")]
    SecurityEventUpserted { event: SecurityEvent },

    /// Resolve all open/ack events on a machine, or just the listed ids.
    #[serde(rename = "security:resolved")]
    SecurityEventsResolved {
        machine_id: MachineId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ids: Option<Vec<SecurityEventId>>,
        at_ms: u64,
    },

    // -- bulk jobs --
    /// Job row plus eagerly resolved executions, created atomically.
    #[serde(rename = "job:created")]
    JobCreated { job: BulkJob, executions: Vec<Execution> },

    #[serde(rename = "job:status_changed")]
    JobStatusChanged { id: JobId, status: JobStatus, at_ms: u64 },

    #[serde(rename = "execution:status_changed")]
    ExecutionStatusChanged {
        id: ExecutionId,
        status: ExecutionStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    #[serde(rename = "execution:output")]
    ExecutionOutput { id: ExecutionId, chunk: String },

    // -- users / access --
    #[serde(rename = "user:created")]
    UserCreated { user: User },

    #[serde(rename = "user:deactivated")]
    UserDeactivated { id: UserId },

    #[serde(rename = "access:granted")]
    MachineAccessGranted { user_id: UserId, machine_id: MachineId },

    #[serde(rename = "access:revoked")]
    MachineAccessRevoked { user_id: UserId, machine_id: MachineId },

    // -- terminal sessions --
    #[serde(rename = "session:issued")]
    SessionIssued { session: TerminalSession },

    #[serde(rename = "session:revoked")]
    SessionRevoked { id: SessionId },

    // -- audit --
    #[serde(rename = "audit:recorded")]
    AuditRecorded { entry: AuditEntry },

    // -- system --
    #[serde(rename = "system:shutdown")]
    Shutdown,

    /// Catch-all for unknown event types (extensibility)
    #[serde(other, skip_serializing)]
    Custom,
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::MachineRegistered { .. } => "machine:registered",
            Event::MachineRefreshed { .. } => "machine:refreshed",
            Event::MachineStatusChanged { .. } => "machine:status_changed",
            Event::MachineHeartbeat { .. } => "machine:heartbeat",
            Event::MachineSecretNormalized { .. } => "machine:secret_normalized",
            Event::MachineGroupAssigned { .. } => "machine:group_assigned",
            Event::MachineGroupUnassigned { .. } => "machine:group_unassigned",
            Event::MetricRecorded { .. } => "metric:recorded",
            Event::CommandCreated { .. } => "command:created",
            Event::CommandStatusChanged { .. } => "command:status_changed",
            Event::CommandOutput { .. } => "command:output",
            Event::ScanApplied { .. } => "scan:applied",
            Event::CveSynced { .. } => "cve:synced",
            Event::CveSyncCompleted { .. } => "cve:sync_completed",
            Event::VulnerabilityMatchesRecomputed { .. } => "vuln:recomputed",
            Event::SecurityEventUpserted { .. } => "security:upserted",
            Event::SecurityEventsResolved { .. } => "security:resolved",
            Event::JobCreated { .. } => "job:created",
            Event::JobStatusChanged { .. } => "job:status_changed",
            Event::ExecutionStatusChanged { .. } => "execution:status_changed",
            Event::ExecutionOutput { .. } => "execution:output",
            Event::UserCreated { .. } => "user:created",
            Event::UserDeactivated { .. } => "user:deactivated",
            Event::MachineAccessGranted { .. } => "access:granted",
            Event::MachineAccessRevoked { .. } => "access:revoked",
            Event::SessionIssued { .. } => "session:issued",
            Event::SessionRevoked { .. } => "session:revoked",
            Event::AuditRecorded { .. } => "audit:recorded",
            Event::Shutdown => "system:shutdown",
            Event::Custom => "custom",
        }
    }

    /// One-line summary for the daemon activity log.
    pub fn log_summary(&self) -> String {
        let t = self.name();
        match self {
            Event::MachineRegistered { machine } | Event::MachineRefreshed { machine } => {
                format!("{} {} ({})", t, machine.id, machine.hostname)
            }
            Event::MachineStatusChanged { id, status, .. } => format!("{} {} → {}", t, id, status),
            Event::MachineHeartbeat { id, .. } => format!("{} {}", t, id),
            Event::MachineSecretNormalized { id, .. } => format!("{} {}", t, id),
            Event::MachineGroupAssigned { id, group } => format!("{} {} +{}", t, id, group),
            Event::MachineGroupUnassigned { id, group } => format!("{} {} -{}", t, id, group),
            Event::MetricRecorded { machine_id, .. } => format!("{} {}", t, machine_id),
            Event::CommandCreated { command } => {
                format!("{} {} on {}", t, command.id, command.machine_id)
            }
            Event::CommandStatusChanged { id, status, .. } => format!("{} {} → {}", t, id, status),
            Event::CommandOutput { id, chunk } => format!("{} {} ({} bytes)", t, id, chunk.len()),
            Event::ScanApplied { scan, packages } => {
                format!("{} {} ({} packages)", t, scan.machine_id, packages.len())
            }
            Event::CveSynced { records } => format!("{} ({} records)", t, records.len()),
            Event::CveSyncCompleted { stats } => {
                format!("{} fetched={} upserted={}", t, stats.fetched, stats.upserted)
            }
            Event::VulnerabilityMatchesRecomputed { machine_id, matches } => {
                format!("{} {} ({} matches)", t, machine_id, matches.len())
            }
            Event::SecurityEventUpserted { event } => {
                format!("{} {} [{}]", t, event.machine_id, event.fingerprint)
            }
            Event::SecurityEventsResolved { machine_id, ids, .. } => match ids {
                Some(ids) => format!("{} {} ({} ids)", t, machine_id, ids.len()),
                None => format!("{} {} (all)", t, machine_id),
            },
            Event::JobCreated { job, executions } => {
                format!("{} {} ({} targets)", t, job.id, executions.len())
            }
            Event::JobStatusChanged { id, status, .. } => format!("{} {} → {}", t, id, status),
            Event::ExecutionStatusChanged { id, status, .. } => {
                format!("{} {} → {}", t, id, status)
            }
            Event::ExecutionOutput { id, chunk } => format!("{} {} ({} bytes)", t, id, chunk.len()),
            Event::UserCreated { user } => format!("{} {}", t, user.username),
            Event::UserDeactivated { id } => format!("{} {}", t, id),
            Event::MachineAccessGranted { user_id, machine_id }
            | Event::MachineAccessRevoked { user_id, machine_id } => {
                format!("{} {} ↔ {}", t, user_id, machine_id)
            }
            Event::SessionIssued { session } => {
                format!("{} {} for {}", t, session.id, session.machine_id)
            }
            Event::SessionRevoked { id } => format!("{} {}", t, id),
            Event::AuditRecorded { entry } => format!("{} {:?}", t, entry.action),
            Event::Shutdown | Event::Custom => t.to_string(),
        }
    }

    /// Machine this event belongs to, when it has a single obvious owner.
    pub fn machine_id(&self) -> Option<&MachineId> {
        match self {
            Event::MachineRegistered { machine } | Event::MachineRefreshed { machine } => {
                Some(&machine.id)
            }
            Event::MachineStatusChanged { id, .. }
            | Event::MachineHeartbeat { id, .. }
            | Event::MachineSecretNormalized { id, .. }
            | Event::MachineGroupAssigned { id, .. }
            | Event::MachineGroupUnassigned { id, .. } => Some(id),
            Event::MetricRecorded { machine_id, .. }
            | Event::VulnerabilityMatchesRecomputed { machine_id, .. }
            | Event::SecurityEventsResolved { machine_id, .. } => Some(machine_id),
            Event::CommandCreated { command } => Some(&command.machine_id),
            Event::ScanApplied { scan, .. } => Some(&scan.machine_id),
            Event::SecurityEventUpserted { event } => Some(&event.machine_id),
            Event::SessionIssued { session } => Some(&session.machine_id),
            _ => None,
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
