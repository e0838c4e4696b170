// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Security events: identity (fingerprints), status, and the dedup invariant.
//!
//! For a given `(machine, type, fingerprint)` at most one non-resolved row
//! exists; the engine enforces this on upsert, the store preserves it on
//! replay.

use crate::machine::MachineId;
use serde::{Deserialize, Serialize};

crate::define_id! {
    /// Unique identifier for a security event row.
    pub struct SecurityEventId("sev-");
}

/// Triage status. `Resolved` and `Ack` are user decisions and survive
/// duplicate arrivals of the same fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventStatus {
    Open,
    Ack,
    Resolved,
}

impl SecurityEventStatus {
    pub fn is_resolved(&self) -> bool {
        matches!(self, SecurityEventStatus::Resolved)
    }
}

crate::simple_display! {
    SecurityEventStatus {
        Open => "open",
        Ack => "ack",
        Resolved => "resolved",
    }
}

/// One deduplicated security finding on one machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub id: SecurityEventId,
    pub machine_id: MachineId,
    /// Event type ("failed_auth", "integrity", "drift", "vulnerability", ...).
    pub kind: String,
    pub severity: crate::cve::Severity,
    pub message: String,
    /// Structured payload; carries `source_ip`, `path`, counters, etc.
    #[serde(default)]
    pub data: serde_json::Value,
    /// Canonical identity across repetitions; see [`fingerprint`].
    pub fingerprint: String,
    pub status: SecurityEventStatus,
    #[serde(default)]
    pub created_at_ms: u64,
    #[serde(default)]
    pub updated_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at_ms: Option<u64>,
}

/// Compute the canonical fingerprint identifying "the same underlying issue"
/// across repetitions of an event.
pub fn fingerprint(kind: &str, message: &str, data: &serde_json::Value) -> String {
    let str_field = |key: &str| data.get(key).and_then(|v| v.as_str());
    match kind {
        "failed_auth" => format!("failed_auth:{}", str_field("source_ip").unwrap_or("")),
        "integrity" => format!("integrity:{}", str_field("path").unwrap_or("")),
        "drift" => {
            format!("drift:{}", str_field("targetPath").unwrap_or(message))
        }
        _ => format!("{}:{}", kind, message),
    }
}

crate::builder! {
    pub struct SecurityEventBuilder => SecurityEvent {
        into {
            id: SecurityEventId = SecurityEventId::from_string("sev-test"),
            machine_id: MachineId = MachineId::from_string("mch-test"),
            kind: String = "failed_auth",
            message: String = "failed ssh auth",
            fingerprint: String = "failed_auth:10.0.0.5",
        }
        set {
            severity: crate::cve::Severity = crate::cve::Severity::Medium,
            data: serde_json::Value = serde_json::Value::Null,
            status: SecurityEventStatus = SecurityEventStatus::Open,
            created_at_ms: u64 = 0,
            updated_at_ms: u64 = 0,
        }
        option {
            resolved_at_ms: u64 = None,
        }
    }
}

#[cfg(test)]
#[path = "security_tests.rs"]
mod tests;
