// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::state::MaterializedState;
use fd_core::{Event, Package, PackageScan, PackageStatus, ScanId, ScanSummary};

fn package(name: &str, version: &str, scan: &ScanId) -> Package {
    Package {
        machine_id: "mch-a".into(),
        name: name.to_string(),
        version: version.to_string(),
        manager: "apt".to_string(),
        status: PackageStatus::Current,
        last_seen_ms: 0,
        scan_id: *scan,
    }
}

fn scan(id: &str) -> PackageScan {
    PackageScan {
        id: ScanId::from_string(id),
        machine_id: "mch-a".into(),
        summary: ScanSummary::default(),
        completed_at_ms: 0,
    }
}

fn apply_scan(state: &mut MaterializedState, scan_id: &str, names: &[(&str, &str)]) {
    let scan = scan(scan_id);
    let packages = names.iter().map(|(n, v)| package(n, v, &scan.id)).collect();
    state.apply_event(&Event::ScanApplied { scan, packages });
}

#[test]
fn scan_inserts_new_packages() {
    let mut state = MaterializedState::default();
    apply_scan(&mut state, "scn-1", &[("nginx", "1.24"), ("openssl", "3.0")]);

    let installed = state.packages.get("mch-a").unwrap();
    assert_eq!(installed.len(), 2);
    assert_eq!(state.latest_scans.get("mch-a").map(String::as_str), Some("scn-1"));
}

#[test]
fn scan_updates_versions_in_place() {
    let mut state = MaterializedState::default();
    apply_scan(&mut state, "scn-1", &[("nginx", "1.24")]);
    apply_scan(&mut state, "scn-2", &[("nginx", "1.26")]);

    let installed = state.packages.get("mch-a").unwrap();
    assert_eq!(installed.len(), 1);
    assert_eq!(installed[0].version, "1.26");
    assert_eq!(installed[0].scan_id, ScanId::from_string("scn-2"));
}

#[test]
fn packages_absent_from_a_nonempty_scan_are_deleted() {
    let mut state = MaterializedState::default();
    apply_scan(&mut state, "scn-1", &[("nginx", "1.24"), ("openssl", "3.0")]);
    apply_scan(&mut state, "scn-2", &[("nginx", "1.24")]);

    let installed = state.packages.get("mch-a").unwrap();
    assert_eq!(installed.len(), 1);
    assert_eq!(installed[0].name, "nginx");
}

#[test]
fn empty_scan_deletes_nothing() {
    let mut state = MaterializedState::default();
    apply_scan(&mut state, "scn-1", &[("nginx", "1.24"), ("openssl", "3.0")]);
    apply_scan(&mut state, "scn-2", &[]);

    assert_eq!(state.packages.get("mch-a").unwrap().len(), 2);
    // The scan row itself still lands.
    assert_eq!(state.latest_scans.get("mch-a").map(String::as_str), Some("scn-2"));
}

#[test]
fn scan_replay_is_idempotent() {
    let mut state = MaterializedState::default();
    let scan = scan("scn-1");
    let packages = vec![package("nginx", "1.24", &scan.id)];
    let event = Event::ScanApplied { scan, packages };
    state.apply_event(&event);
    state.apply_event(&event);

    assert_eq!(state.packages.get("mch-a").unwrap().len(), 1);
    assert_eq!(state.scans.len(), 1);
}

#[test]
fn scans_are_scoped_per_machine() {
    let mut state = MaterializedState::default();
    apply_scan(&mut state, "scn-1", &[("nginx", "1.24")]);

    let other_scan = PackageScan {
        id: ScanId::from_string("scn-2"),
        machine_id: "mch-b".into(),
        summary: ScanSummary::default(),
        completed_at_ms: 0,
    };
    let other_pkg = Package {
        machine_id: "mch-b".into(),
        name: "redis".to_string(),
        version: "7.2".to_string(),
        manager: "apt".to_string(),
        status: PackageStatus::Current,
        last_seen_ms: 0,
        scan_id: other_scan.id,
    };
    state.apply_event(&Event::ScanApplied { scan: other_scan, packages: vec![other_pkg] });

    assert_eq!(state.packages.get("mch-a").unwrap().len(), 1);
    assert_eq!(state.packages.get("mch-b").unwrap().len(), 1);
}
