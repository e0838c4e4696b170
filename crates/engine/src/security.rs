// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Security-event deduplication and cooldown engine.
//!
//! Ingest computes a fingerprint, finds any existing row (any status) with
//! that fingerprint on the machine, and decides: suppress (cooldown),
//! update in place (preserving a user's resolved/ack decision), or insert
//! a fresh open row. The store keeps at most one non-resolved row per
//! `(machine, type, fingerprint)`.

use crate::seams::EventSink;
use fd_core::{
    security, Clock, Event, Fault, MachineId, SecurityEvent, SecurityEventId,
    SecurityEventStatus, Severity, VulnerabilitySummary,
};
use fd_storage::MaterializedState;
use fd_wire::AgentSecurityEvent;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Which arrival path an event came in on. The scan-embedded path uses the
/// shorter integrity cooldown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestPath {
    Direct,
    Scan,
}

impl IngestPath {
    /// Integrity cooldown window for this path.
    fn integrity_cooldown_ms(&self) -> u64 {
        match self {
            IngestPath::Direct => 30 * 60 * 1000,
            IngestPath::Scan => 15 * 60 * 1000,
        }
    }
}

/// Paths whose integrity events are noise and dropped unconditionally.
const INTEGRITY_DENY_LIST: &[&str] = &[
    "var/log",
    "var/lib/docker/containers",
    "var/cache/apt",
    "var/lib/apt",
    "var/lib/dpkg",
    "var/tmp",
    "root/.pm2/logs",
];

/// Directories whose integrity changes are high severity.
const HIGH_SEVERITY_PREFIXES: &[&str] =
    &["/etc", "/root/.ssh", "/usr/bin", "/usr/sbin", "/sbin", "/bin", "/boot", "/lib"];

/// Directories whose integrity changes are medium severity.
const MEDIUM_SEVERITY_PREFIXES: &[&str] = &["/opt", "/srv", "/var/www"];

/// Fixed fingerprint for the per-machine vulnerability aggregate, so
/// recomputes update one row in place.
const VULNERABILITY_FINGERPRINT: &str = "vulnerability:summary";

/// The deduplication engine.
pub struct SecurityEngine<C: Clock> {
    state: Arc<Mutex<MaterializedState>>,
    sink: Arc<dyn EventSink>,
    clock: C,
}

impl<C: Clock> SecurityEngine<C> {
    pub fn new(state: Arc<Mutex<MaterializedState>>, sink: Arc<dyn EventSink>, clock: C) -> Self {
        Self { state, sink, clock }
    }

    /// Ingest one raw agent finding.
    ///
    /// Returns the stored row for broadcasting, or `None` when the event
    /// was filtered or suppressed by a cooldown.
    pub fn ingest(
        &self,
        machine_id: &MachineId,
        raw: &AgentSecurityEvent,
        path: IngestPath,
    ) -> Result<Option<SecurityEvent>, Fault> {
        let now_ms = self.clock.epoch_ms();

        if raw.kind == "integrity" {
            if let Some(event_path) = raw.data.get("path").and_then(|p| p.as_str()) {
                if is_denied_path(event_path) {
                    debug!(machine = %machine_id, path = event_path, "integrity event on deny-listed path, dropped");
                    return Ok(None);
                }
            }
        }

        let fingerprint = security::fingerprint(&raw.kind, &raw.message, &raw.data);
        let severity = classify(&raw.kind, &raw.data);

        self.upsert(
            machine_id,
            &raw.kind,
            severity,
            &raw.message,
            raw.data.clone(),
            fingerprint,
            Some(path.integrity_cooldown_ms()).filter(|_| raw.kind == "integrity"),
            now_ms,
        )
    }

    /// Upsert the per-machine vulnerability aggregate. Always updates in
    /// place (fixed fingerprint, no cooldown).
    pub fn record_vulnerability_summary(
        &self,
        machine_id: &MachineId,
        summary: VulnerabilitySummary,
    ) -> Result<Option<SecurityEvent>, Fault> {
        let now_ms = self.clock.epoch_ms();
        let severity = if summary.critical > 0 {
            Severity::Critical
        } else if summary.high > 0 {
            Severity::High
        } else if summary.medium > 0 {
            Severity::Medium
        } else {
            Severity::Low
        };
        let message = format!("{} vulnerable packages detected", summary.total);
        let data = serde_json::to_value(summary).unwrap_or_default();

        self.upsert(
            machine_id,
            "vulnerability",
            severity,
            &message,
            data,
            VULNERABILITY_FINGERPRINT.to_string(),
            None,
            now_ms,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn upsert(
        &self,
        machine_id: &MachineId,
        kind: &str,
        severity: Severity,
        message: &str,
        data: serde_json::Value,
        fingerprint: String,
        cooldown_ms: Option<u64>,
        now_ms: u64,
    ) -> Result<Option<SecurityEvent>, Fault> {
        // Decide under the state lock so concurrent arrivals of the same
        // fingerprint serialize and the at-most-one-open invariant holds.
        let decided = {
            let state = self.state.lock();
            match state.security_event_by_fingerprint(machine_id.as_str(), &fingerprint) {
                Some(existing) => {
                    if existing.status == SecurityEventStatus::Open {
                        if let Some(window) = cooldown_ms {
                            if now_ms.saturating_sub(existing.updated_at_ms) < window {
                                debug!(
                                    machine = %machine_id,
                                    fingerprint = %fingerprint,
                                    "within cooldown, suppressed"
                                );
                                return Ok(None);
                            }
                        }
                    }
                    // Update fields in place; the user's resolved/ack
                    // decision wins over re-arrivals.
                    let mut row = existing.clone();
                    row.severity = severity;
                    row.message = message.to_string();
                    row.data = data;
                    row.updated_at_ms = now_ms;
                    row
                }
                None => SecurityEvent {
                    id: SecurityEventId::new(),
                    machine_id: *machine_id,
                    kind: kind.to_string(),
                    severity,
                    message: message.to_string(),
                    data,
                    fingerprint,
                    status: SecurityEventStatus::Open,
                    created_at_ms: now_ms,
                    updated_at_ms: now_ms,
                    resolved_at_ms: None,
                },
            }
        };

        self.sink.emit(Event::SecurityEventUpserted { event: decided.clone() })?;
        Ok(Some(decided))
    }

    /// Resolve every open/ack event on a machine. Returns how many rows
    /// flipped.
    pub fn resolve_all(&self, machine_id: &MachineId) -> Result<u32, Fault> {
        self.resolve(machine_id, None)
    }

    /// Resolve only the listed events on a machine.
    pub fn resolve_ids(
        &self,
        machine_id: &MachineId,
        ids: Vec<SecurityEventId>,
    ) -> Result<u32, Fault> {
        self.resolve(machine_id, Some(ids))
    }

    fn resolve(
        &self,
        machine_id: &MachineId,
        ids: Option<Vec<SecurityEventId>>,
    ) -> Result<u32, Fault> {
        let now_ms = self.clock.epoch_ms();
        let affected = {
            let state = self.state.lock();
            state
                .security_events
                .values()
                .filter(|e| {
                    e.machine_id == *machine_id
                        && !e.status.is_resolved()
                        && ids
                            .as_ref()
                            .map(|ids| ids.contains(&e.id))
                            .unwrap_or(true)
                })
                .count() as u32
        };

        if affected > 0 {
            self.sink.emit(Event::SecurityEventsResolved {
                machine_id: *machine_id,
                ids,
                at_ms: now_ms,
            })?;
        }
        Ok(affected)
    }
}

/// Whether an integrity path is on the unconditional deny-list.
fn is_denied_path(path: &str) -> bool {
    let normalized = path.trim_start_matches('/');
    INTEGRITY_DENY_LIST.iter().any(|deny| {
        normalized == *deny || normalized.starts_with(&format!("{}/", deny))
    })
}

/// Severity classification. Integrity severity is path-based; other kinds
/// get fixed defaults.
fn classify(kind: &str, data: &serde_json::Value) -> Severity {
    match kind {
        "integrity" => {
            let path = data.get("path").and_then(|p| p.as_str()).unwrap_or("");
            classify_integrity_path(path)
        }
        "failed_auth" | "drift" => Severity::Medium,
        _ => Severity::Low,
    }
}

fn classify_integrity_path(path: &str) -> Severity {
    let with_slash = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };

    let under = |prefix: &str| {
        with_slash == prefix || with_slash.starts_with(&format!("{}/", prefix))
    };

    if HIGH_SEVERITY_PREFIXES.iter().any(|p| under(p)) {
        return Severity::High;
    }
    if MEDIUM_SEVERITY_PREFIXES.iter().any(|p| under(p)) {
        return Severity::Medium;
    }
    // /home/<user>/bin is medium as well.
    if let Some(rest) = with_slash.strip_prefix("/home/") {
        let mut parts = rest.splitn(2, '/');
        let _user = parts.next();
        if let Some(tail) = parts.next() {
            if tail == "bin" || tail.starts_with("bin/") {
                return Severity::Medium;
            }
        }
    }
    Severity::Low
}

#[cfg(test)]
#[path = "security_tests.rs"]
mod tests;
