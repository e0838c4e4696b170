// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use fd_core::test_support::online_machine;
use fd_core::{Event, MachineStatus, MetricSnapshot, SecurityEvent};

fn apply(state: &mut MaterializedState, cache: &mut FleetCache, event: Event) {
    state.apply_event(&event);
    cache.apply(&event, state);
}

#[test]
fn rebuild_mirrors_machines_and_latest_metric() {
    let mut state = MaterializedState::default();
    state.apply_event(&Event::MachineRegistered { machine: online_machine("mch-a", "host-a") });
    state.apply_event(&Event::MetricRecorded {
        machine_id: "mch-a".into(),
        metric: MetricSnapshot { cpu_percent: 50.0, recorded_at_ms: 1, ..Default::default() },
    });
    state.apply_event(&Event::MetricRecorded {
        machine_id: "mch-a".into(),
        metric: MetricSnapshot { cpu_percent: 75.0, recorded_at_ms: 2, ..Default::default() },
    });

    let cache = FleetCache::rebuild(&state);
    assert_eq!(cache.len(), 1);
    let summary = cache.get("mch-a").unwrap();
    assert_eq!(summary.latest_metric.as_ref().unwrap().cpu_percent, 75.0);
}

#[test]
fn write_through_tracks_status_changes() {
    let mut state = MaterializedState::default();
    let mut cache = FleetCache::default();

    apply(
        &mut state,
        &mut cache,
        Event::MachineRegistered { machine: online_machine("mch-a", "host-a") },
    );
    assert_eq!(cache.get("mch-a").unwrap().machine.status, MachineStatus::Online);

    apply(
        &mut state,
        &mut cache,
        Event::MachineStatusChanged {
            id: "mch-a".into(),
            status: MachineStatus::Offline,
            at_ms: 5,
        },
    );
    assert_eq!(cache.get("mch-a").unwrap().machine.status, MachineStatus::Offline);
}

#[test]
fn security_mutations_refresh_counts() {
    let mut state = MaterializedState::default();
    let mut cache = FleetCache::default();
    apply(
        &mut state,
        &mut cache,
        Event::MachineRegistered { machine: online_machine("mch-test", "host-a") },
    );

    apply(
        &mut state,
        &mut cache,
        Event::SecurityEventUpserted { event: SecurityEvent::builder().id("sev-1").build() },
    );
    assert_eq!(cache.get("mch-test").unwrap().open_events, 1);

    apply(
        &mut state,
        &mut cache,
        Event::SecurityEventsResolved { machine_id: "mch-test".into(), ids: None, at_ms: 9 },
    );
    assert_eq!(cache.get("mch-test").unwrap().open_events, 0);
}

#[test]
fn snapshot_is_sorted_by_hostname() {
    let mut state = MaterializedState::default();
    let mut cache = FleetCache::default();
    apply(
        &mut state,
        &mut cache,
        Event::MachineRegistered { machine: online_machine("mch-b", "zz-host") },
    );
    apply(
        &mut state,
        &mut cache,
        Event::MachineRegistered { machine: online_machine("mch-a", "aa-host") },
    );

    let all = cache.snapshot();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].machine.hostname, "aa-host");
    assert_eq!(all[1].machine.hostname, "zz-host");
}
