// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Package scan application.
//!
//! One `scan:applied` event carries the whole batch: every listed package
//! is upserted by name, then packages absent from a non-empty scan are
//! garbage-collected. An empty scan never deletes.

use super::MaterializedState;
use fd_core::Event;
use std::collections::HashSet;

pub(super) fn apply(state: &mut MaterializedState, event: &Event) {
    let Event::ScanApplied { scan, packages } = event else {
        return;
    };

    let machine_key = scan.machine_id.as_str().to_string();

    state.scans.insert(scan.id.as_str().to_string(), scan.clone());
    state.latest_scans.insert(machine_key.clone(), scan.id.as_str().to_string());

    let installed = state.packages.entry(machine_key).or_default();

    for package in packages {
        match installed.iter_mut().find(|p| p.name == package.name) {
            Some(existing) => *existing = package.clone(),
            None => installed.push(package.clone()),
        }
    }

    // GC only when the scan itself reported at least one package.
    if !packages.is_empty() {
        let seen: HashSet<&str> = packages.iter().map(|p| p.name.as_str()).collect();
        installed.retain(|p| seen.contains(p.name.as_str()));
    }
}
