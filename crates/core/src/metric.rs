// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Timestamped resource snapshots reported by agents.

use serde::{Deserialize, Serialize};

/// One metric sample. Append-only; the newest sample per machine is
/// mirrored into the fleet cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub cpu_percent: f64,
    pub ram_percent: f64,
    pub ram_total_bytes: u64,
    pub ram_used_bytes: u64,
    pub disk_percent: f64,
    pub disk_total_bytes: u64,
    pub disk_used_bytes: u64,
    /// Host uptime in seconds.
    pub uptime_secs: u64,
    /// Server receive time, epoch milliseconds.
    #[serde(default)]
    pub recorded_at_ms: u64,
}
