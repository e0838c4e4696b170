// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Vulnerability matching: installed packages × mirrored CVEs.

use crate::cve::versions;
use fd_core::{Ecosystem, MachineId, VulnerabilityMatch};
use fd_storage::MaterializedState;

/// Recompute all matches for one machine.
///
/// A package matches a CVE when the ecosystems agree, the names are equal,
/// and the installed version falls in an affected range (or is enumerated
/// explicitly).
pub fn compute_matches(state: &MaterializedState, machine_id: &MachineId) -> Vec<VulnerabilityMatch> {
    let Some(packages) = state.packages.get(machine_id.as_str()) else {
        return Vec::new();
    };

    let mut matches = Vec::new();
    for package in packages {
        let Some(ecosystem) = Ecosystem::from_manager(&package.manager) else {
            continue;
        };
        for cve in state.cves.values() {
            let affected = cve.affected.iter().any(|entry| {
                entry.ecosystem == ecosystem
                    && entry.name == package.name
                    && versions::version_affected(ecosystem, &package.version, entry)
            });
            if affected {
                matches.push(VulnerabilityMatch {
                    machine_id: *machine_id,
                    package_name: package.name.clone(),
                    package_version: package.version.clone(),
                    cve_id: cve.id.clone(),
                    severity: cve.severity,
                });
            }
        }
    }

    matches.sort_by(|a, b| {
        (a.package_name.as_str(), a.cve_id.as_str())
            .cmp(&(b.package_name.as_str(), b.cve_id.as_str()))
    });
    matches
}

#[cfg(test)]
#[path = "matcher_tests.rs"]
mod tests;
