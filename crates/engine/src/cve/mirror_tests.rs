// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_support::MemorySink;
use fd_core::{FakeClock, Severity};
use std::time::Duration;

struct Harness {
    mirror: Arc<CveMirror<FakeClock>>,
    sink: Arc<MemorySink>,
    state: Arc<Mutex<MaterializedState>>,
}

fn harness() -> Harness {
    let state = Arc::new(Mutex::new(MaterializedState::default()));
    let sink = Arc::new(MemorySink::new(Arc::clone(&state)));
    let mirror = CveMirror::new(
        Arc::clone(&state),
        Arc::clone(&sink) as Arc<dyn crate::EventSink>,
        FakeClock::new(),
        MirrorConfig {
            // Never reached: with no packages in state, a sync touches no
            // network.
            base_url: "http://127.0.0.1:9".to_string(),
            ..Default::default()
        },
    );
    Harness { mirror, sink, state }
}

#[tokio::test(start_paused = true)]
async fn status_starts_idle() {
    let h = harness();
    let view = h.mirror.status();
    assert_eq!(view.status, "idle");
    assert_eq!(view.cve_count, 0);
    assert!(view.last_completed_at_ms.is_none());
}

#[tokio::test(start_paused = true)]
async fn second_trigger_while_running_is_rejected() {
    let h = harness();

    // First trigger wins; the sync task has not run yet on the paused
    // runtime, so the mirror is mid-flight.
    h.mirror.trigger().unwrap();
    assert_eq!(h.mirror.status().status, "running");

    assert_eq!(h.mirror.trigger(), Err(Fault::AlreadyRunning));

    // Let the (empty) sync finish; the mirror returns to idle and a
    // fresh trigger is accepted.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.mirror.status().status, "idle");
    h.mirror.trigger().unwrap();
}

#[tokio::test(start_paused = true)]
async fn completed_sync_records_stats() {
    let h = harness();
    h.mirror.trigger().unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let state = h.state.lock();
    assert_eq!(state.cve_sync_history.len(), 1);
    assert!(state.cve_sync_history[0].error.is_none());
    drop(state);

    assert!(h.sink.event_names().contains(&"cve:sync_completed"));
    let view = h.mirror.status();
    assert!(view.last_completed_at_ms.is_some());
    assert!(view.last_error.is_none());
}

#[tokio::test(start_paused = true)]
async fn recompute_matches_persists_and_summarizes() {
    let h = harness();
    {
        let mut state = h.state.lock();
        let scan_id = fd_core::ScanId::from_string("scn-1");
        state.apply_event(&fd_core::Event::ScanApplied {
            scan: fd_core::PackageScan {
                id: scan_id,
                machine_id: "mch-1".into(),
                summary: fd_core::ScanSummary::default(),
                completed_at_ms: 0,
            },
            packages: vec![fd_core::Package {
                machine_id: "mch-1".into(),
                name: "nginx".into(),
                version: "1.22.0".into(),
                manager: "apt".into(),
                status: fd_core::PackageStatus::Current,
                last_seen_ms: 0,
                scan_id,
            }],
        });
        state.apply_event(&fd_core::Event::CveSynced {
            records: vec![fd_core::CveRecord {
                id: "CVE-1".into(),
                severity: Severity::Critical,
                published_at: String::new(),
                affected: vec![fd_core::AffectedPackage {
                    ecosystem: Ecosystem::Debian,
                    name: "nginx".into(),
                    ranges: vec![fd_core::VersionRange {
                        introduced: Some("0".into()),
                        fixed: Some("1.24.0".into()),
                        last_affected: None,
                    }],
                    versions: Vec::new(),
                }],
                description: String::new(),
                source: "osv".into(),
            }],
        });
    }

    let summary = h.mirror.recompute_matches(&"mch-1".into()).unwrap();
    assert_eq!(summary.total, 1);
    assert_eq!(summary.critical, 1);

    let state = h.state.lock();
    let matches = state.vulnerability_matches.get("mch-1").unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].cve_id, "CVE-1");
}

#[tokio::test(start_paused = true)]
async fn recompute_with_no_matches_clears_previous_rows() {
    let h = harness();
    {
        let mut state = h.state.lock();
        state.vulnerability_matches.insert(
            "mch-1".to_string(),
            vec![fd_core::VulnerabilityMatch {
                machine_id: "mch-1".into(),
                package_name: "old".into(),
                package_version: "1.0".into(),
                cve_id: "CVE-OLD".into(),
                severity: Severity::Low,
            }],
        );
    }

    let summary = h.mirror.recompute_matches(&"mch-1".into()).unwrap();
    assert_eq!(summary.total, 0);
    assert!(h.state.lock().vulnerability_matches.get("mch-1").unwrap().is_empty());
}
