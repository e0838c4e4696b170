// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Materialized state from WAL replay

mod audit;
mod commands;
mod cves;
mod jobs;
mod machines;
mod packages;
mod security;
mod sessions;
mod users;

use fd_core::{
    AuditEntry, BulkJob, CommandRecord, CveRecord, Event, Execution, Machine, MetricSnapshot,
    Package, PackageScan, SecurityEvent, TerminalSession, User, VulnerabilityMatch,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Most recent metric samples kept per machine.
pub const METRIC_HISTORY_LIMIT: usize = 360;

/// Audit entries kept in materialized state (the WAL retains the full
/// stream until snapshot truncation).
pub const AUDIT_LOG_LIMIT: usize = 10_000;

/// Command and execution output cap. Appends beyond this are dropped and
/// the marker appended once.
pub const OUTPUT_LIMIT_BYTES: usize = 256 * 1024;

pub(crate) const TRUNCATION_MARKER: &str = "\n[truncated]";

/// Materialized state built from event replay.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct MaterializedState {
    pub machines: HashMap<String, Machine>,
    /// Bounded per-machine metric history, newest last.
    #[serde(default)]
    pub metrics: HashMap<String, Vec<MetricSnapshot>>,
    pub commands: HashMap<String, CommandRecord>,
    /// Scan rows by scan ID.
    #[serde(default)]
    pub scans: HashMap<String, PackageScan>,
    /// Newest scan per machine.
    #[serde(default)]
    pub latest_scans: HashMap<String, String>,
    /// Installed packages per machine, unique by name.
    #[serde(default)]
    pub packages: HashMap<String, Vec<Package>>,
    /// Mirrored CVE records by upstream ID.
    #[serde(default)]
    pub cves: HashMap<String, CveRecord>,
    /// Completed sync stats, newest last (bounded).
    #[serde(default)]
    pub cve_sync_history: Vec<fd_core::event::CveSyncStats>,
    /// Vulnerability matches per machine, replaced wholesale on recompute.
    #[serde(default)]
    pub vulnerability_matches: HashMap<String, Vec<VulnerabilityMatch>>,
    /// Security events by event ID.
    #[serde(default)]
    pub security_events: HashMap<String, SecurityEvent>,
    pub jobs: HashMap<String, BulkJob>,
    pub executions: HashMap<String, Execution>,
    pub users: HashMap<String, User>,
    /// user ID → machine IDs with explicit access (admins bypass).
    #[serde(default)]
    pub machine_access: HashMap<String, Vec<String>>,
    pub sessions: HashMap<String, TerminalSession>,
    /// Append-only audit trail (bounded in memory).
    #[serde(default)]
    pub audit_log: Vec<AuditEntry>,
}

impl MaterializedState {
    pub fn get_machine(&self, id: &str) -> Option<&Machine> {
        self.machines.get(id)
    }

    pub fn get_job(&self, id: &str) -> Option<&BulkJob> {
        self.jobs.get(id)
    }

    /// Executions belonging to one job.
    pub fn executions_for_job(&self, job_id: &str) -> Vec<&Execution> {
        let mut execs: Vec<&Execution> =
            self.executions.values().filter(|e| e.job_id.as_str() == job_id).collect();
        execs.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        execs
    }

    /// Latest metric for a machine, if any.
    pub fn latest_metric(&self, machine_id: &str) -> Option<&MetricSnapshot> {
        self.metrics.get(machine_id).and_then(|v| v.last())
    }

    /// Any security event (regardless of status) with this fingerprint on
    /// this machine. When several resolved rows share a fingerprint the
    /// most recently updated wins.
    pub fn security_event_by_fingerprint(
        &self,
        machine_id: &str,
        fingerprint: &str,
    ) -> Option<&SecurityEvent> {
        self.security_events
            .values()
            .filter(|e| e.machine_id.as_str() == machine_id && e.fingerprint == fingerprint)
            .max_by_key(|e| (u8::from(!e.status.is_resolved()), e.updated_at_ms))
    }

    /// Open and acknowledged event counts for one machine.
    pub fn open_event_counts(&self, machine_id: &str) -> (u32, u32) {
        let mut open = 0;
        let mut ack = 0;
        for event in self.security_events.values() {
            if event.machine_id.as_str() != machine_id {
                continue;
            }
            match event.status {
                fd_core::SecurityEventStatus::Open => open += 1,
                fd_core::SecurityEventStatus::Ack => ack += 1,
                fd_core::SecurityEventStatus::Resolved => {}
            }
        }
        (open, ack)
    }

    /// Whether a user may act on a machine (admins bypass the mapping).
    pub fn user_can_access(&self, user: &User, machine_id: &str) -> bool {
        if user.role == fd_core::Role::Admin {
            return true;
        }
        self.machine_access
            .get(user.id.as_str())
            .map(|ids| ids.iter().any(|m| m == machine_id))
            .unwrap_or(false)
    }

    /// Apply an event to derive state changes.
    ///
    /// This is the event-sourcing approach where state is derived from
    /// events. Events are facts about what happened; state is derived from
    /// those facts.
    ///
    /// # Idempotency Requirement
    ///
    /// **All event handlers MUST be idempotent.** Applying the same event
    /// twice must produce the same state as applying it once, because
    /// events are applied on the live path for immediate visibility and
    /// again during WAL replay after recovery.
    ///
    /// Guidelines:
    /// - Use assignment (`=`) instead of mutation (`+=`, `-=`)
    /// - Guard inserts with existence checks
    /// - Guard status changes with `rank()` comparisons so replays cannot
    ///   regress a terminal state
    pub fn apply_event(&mut self, event: &Event) {
        match event {
            // Machines and metrics
            Event::MachineRegistered { .. }
            | Event::MachineRefreshed { .. }
            | Event::MachineStatusChanged { .. }
            | Event::MachineHeartbeat { .. }
            | Event::MachineSecretNormalized { .. }
            | Event::MachineGroupAssigned { .. }
            | Event::MachineGroupUnassigned { .. }
            | Event::MetricRecorded { .. } => machines::apply(self, event),

            // Commands
            Event::CommandCreated { .. }
            | Event::CommandStatusChanged { .. }
            | Event::CommandOutput { .. } => commands::apply(self, event),

            // Scans and packages
            Event::ScanApplied { .. } => packages::apply(self, event),

            // CVE mirror
            Event::CveSynced { .. }
            | Event::CveSyncCompleted { .. }
            | Event::VulnerabilityMatchesRecomputed { .. } => cves::apply(self, event),

            // Security events
            Event::SecurityEventUpserted { .. } | Event::SecurityEventsResolved { .. } => {
                security::apply(self, event)
            }

            // Bulk jobs
            Event::JobCreated { .. }
            | Event::JobStatusChanged { .. }
            | Event::ExecutionStatusChanged { .. }
            | Event::ExecutionOutput { .. } => jobs::apply(self, event),

            // Users and access
            Event::UserCreated { .. }
            | Event::UserDeactivated { .. }
            | Event::MachineAccessGranted { .. }
            | Event::MachineAccessRevoked { .. } => users::apply(self, event),

            // Terminal sessions
            Event::SessionIssued { .. } | Event::SessionRevoked { .. } => {
                sessions::apply(self, event)
            }

            // Audit trail
            Event::AuditRecorded { .. } => audit::apply(self, event),

            // Control events that don't touch persisted state
            Event::Shutdown | Event::Custom => {}
        }
    }
}

/// Append a chunk to an output buffer, respecting [`OUTPUT_LIMIT_BYTES`].
/// Idempotent with respect to the marker: once truncated, further chunks
/// are dropped.
pub(crate) fn append_bounded(output: &mut String, chunk: &str) {
    if output.ends_with(TRUNCATION_MARKER) {
        return;
    }
    if output.len() + chunk.len() <= OUTPUT_LIMIT_BYTES {
        output.push_str(chunk);
        return;
    }
    let room = OUTPUT_LIMIT_BYTES.saturating_sub(output.len());
    let mut end = room.min(chunk.len());
    while end > 0 && !chunk.is_char_boundary(end) {
        end -= 1;
    }
    output.push_str(&chunk[..end]);
    output.push_str(TRUNCATION_MARKER);
}

#[cfg(test)]
#[path = "../state_tests/mod.rs"]
mod tests;
