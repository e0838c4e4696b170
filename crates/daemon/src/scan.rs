// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scan-result pipeline, shared by the agent socket and the HTTP
//! fallback endpoint.
//!
//! One scan becomes one batch event (upserts plus garbage collection),
//! then the embedded security findings are ingested on the scan path
//! (shorter integrity cooldown), and finally the machine's vulnerability
//! matches are recomputed and the aggregate event refreshed.

use crate::ctx::AppCtx;
use fd_core::{
    Clock, Event, Fault, MachineId, Package, PackageScan, PackageStatus, ScanId, ScanSummary,
};
use fd_engine::{EventSink, IngestPath};
use fd_wire::{AgentSecurityEvent, ScannedPackage};
use tracing::info;

pub fn process_scan<C: Clock + 'static>(
    ctx: &AppCtx<C>,
    machine_id: &MachineId,
    summary: ScanSummary,
    packages: Vec<ScannedPackage>,
    events: Vec<AgentSecurityEvent>,
) -> Result<ScanId, Fault> {
    let now_ms = ctx.clock.epoch_ms();

    if ctx.state.lock().get_machine(machine_id.as_str()).is_none() {
        return Err(Fault::MachineNotFound);
    }

    let scan_id = ScanId::new();
    let scan = PackageScan {
        id: scan_id,
        machine_id: *machine_id,
        summary,
        completed_at_ms: now_ms,
    };

    let package_rows: Vec<Package> = packages
        .into_iter()
        .map(|p| Package {
            machine_id: *machine_id,
            name: p.name,
            version: p.version,
            manager: p.manager,
            status: if p.security_update {
                PackageStatus::SecurityUpdate
            } else if p.update_available {
                PackageStatus::UpdateAvailable
            } else {
                PackageStatus::Current
            },
            last_seen_ms: now_ms,
            scan_id,
        })
        .collect();

    let package_count = package_rows.len();
    ctx.bus.emit(Event::ScanApplied { scan, packages: package_rows })?;

    // Scan-embedded findings use the shorter integrity cooldown.
    for event in &events {
        let _ = ctx.security.ingest(machine_id, event, IngestPath::Scan);
    }

    // Recompute matches and refresh the per-machine aggregate.
    let vuln_summary = ctx.mirror.recompute_matches(machine_id)?;
    let _ = ctx.security.record_vulnerability_summary(machine_id, vuln_summary);

    info!(
        machine = %machine_id,
        scan = %scan_id,
        packages = package_count,
        findings = events.len(),
        "scan applied"
    );
    Ok(scan_id)
}

#[cfg(test)]
#[path = "scan_tests.rs"]
mod tests;
