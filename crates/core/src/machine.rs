// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Machine identity, status, and target queries.

use serde::{Deserialize, Serialize};

crate::define_id! {
    /// Unique identifier for a managed machine.
    ///
    /// Agents present their own machine ID on registration, so IDs arriving
    /// over the wire go through `from_string`; `new()` is only used when the
    /// server itself mints one (tests, seeding).
    pub struct MachineId("mch-");
}

/// Liveness status of a machine, driven by the agent connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineStatus {
    Online,
    Offline,
}

crate::simple_display! {
    MachineStatus {
        Online => "online",
        Offline => "offline",
    }
}

/// A managed host.
///
/// Created on first-seen registration and never deleted implicitly.
/// Invariant: `secret_hash` = SHA-256 of the normalized shared secret,
/// `secret_enc` is the same secret encrypted at rest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Machine {
    pub id: MachineId,
    pub hostname: String,
    pub ip: String,
    pub os_info: String,
    pub status: MachineStatus,
    /// SHA-256 hex digest of the normalized shared secret, for lookup.
    pub secret_hash: String,
    /// AES-GCM ciphertext of the shared secret (base64, embedded nonce).
    pub secret_enc: String,
    /// Named groups this machine belongs to (bulk-job `group` targets).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
    #[serde(default)]
    pub last_heartbeat_ms: u64,
    #[serde(default)]
    pub created_at_ms: u64,
}

impl Machine {
    pub fn is_online(&self) -> bool {
        self.status == MachineStatus::Online
    }
}

/// Structured query over machine fields for `dynamic` bulk-job targets.
///
/// All present filters must match (conjunction). An empty query matches
/// every machine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineQuery {
    /// Substring match on hostname.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname_contains: Option<String>,
    /// Substring match on os_info.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_contains: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MachineStatus>,
    /// Exact group membership.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

impl MachineQuery {
    /// Whether the given machine satisfies every present filter.
    pub fn matches(&self, machine: &Machine) -> bool {
        if let Some(ref needle) = self.hostname_contains {
            if !machine.hostname.contains(needle.as_str()) {
                return false;
            }
        }
        if let Some(ref needle) = self.os_contains {
            if !machine.os_info.contains(needle.as_str()) {
                return false;
            }
        }
        if let Some(status) = self.status {
            if machine.status != status {
                return false;
            }
        }
        if let Some(ref group) = self.group {
            if !machine.groups.iter().any(|g| g == group) {
                return false;
            }
        }
        true
    }
}

crate::builder! {
    pub struct MachineBuilder => Machine {
        into {
            id: MachineId = MachineId::from_string("mch-test"),
            hostname: String = "host-1",
            ip: String = "10.0.0.1",
            os_info: String = "Debian GNU/Linux 12",
            secret_hash: String = "",
            secret_enc: String = "",
        }
        set {
            status: MachineStatus = MachineStatus::Offline,
            groups: Vec<String> = Vec::new(),
            last_heartbeat_ms: u64 = 0,
            created_at_ms: u64 = 0,
        }
    }
}

#[cfg(test)]
#[path = "machine_tests.rs"]
mod tests;
