// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Installed packages and package scans.

use crate::machine::MachineId;
use serde::{Deserialize, Serialize};

crate::define_id! {
    /// Unique identifier for one agent package scan.
    pub struct ScanId("scn-");
}

/// Update status of an installed package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageStatus {
    Current,
    UpdateAvailable,
    SecurityUpdate,
}

crate::simple_display! {
    PackageStatus {
        Current => "current",
        UpdateAvailable => "update_available",
        SecurityUpdate => "security_update",
    }
}

/// One installed package on one machine. `(machine_id, name)` is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Package {
    pub machine_id: MachineId,
    pub name: String,
    pub version: String,
    /// Package manager that owns it ("apt", "npm", "pip", ...).
    pub manager: String,
    pub status: PackageStatus,
    #[serde(default)]
    pub last_seen_ms: u64,
    pub scan_id: ScanId,
}

/// Aggregate counters reported with a scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub total: u32,
    pub updates: u32,
    pub security_updates: u32,
    /// Filesystem paths the agent covered during integrity checks.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<String>,
}

/// Summary row for one completed scan. The newest scan per machine is the
/// one the UI references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageScan {
    pub id: ScanId,
    pub machine_id: MachineId,
    pub summary: ScanSummary,
    #[serde(default)]
    pub completed_at_ms: u64,
}
