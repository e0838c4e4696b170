// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::state::{MaterializedState, METRIC_HISTORY_LIMIT};
use fd_core::test_support::online_machine;
use fd_core::{Event, MachineStatus, MetricSnapshot};

fn registered() -> MaterializedState {
    let mut state = MaterializedState::default();
    state.apply_event(&Event::MachineRegistered { machine: online_machine("mch-a", "host-a") });
    state
}

#[test]
fn registration_upserts_by_id() {
    let mut state = registered();
    let mut updated = online_machine("mch-a", "renamed");
    updated.ip = "10.9.9.9".to_string();
    state.apply_event(&Event::MachineRegistered { machine: updated });

    assert_eq!(state.machines.len(), 1);
    let row = state.get_machine("mch-a").unwrap();
    assert_eq!(row.hostname, "renamed");
    assert_eq!(row.ip, "10.9.9.9");
}

#[test]
fn reregistration_preserves_group_membership() {
    let mut state = registered();
    state.apply_event(&Event::MachineGroupAssigned { id: "mch-a".into(), group: "web".into() });

    state.apply_event(&Event::MachineRegistered { machine: online_machine("mch-a", "host-a") });
    assert_eq!(state.get_machine("mch-a").unwrap().groups, vec!["web".to_string()]);
}

#[test]
fn status_change_updates_row() {
    let mut state = registered();
    state.apply_event(&Event::MachineStatusChanged {
        id: "mch-a".into(),
        status: MachineStatus::Offline,
        at_ms: 100,
    });
    assert_eq!(state.get_machine("mch-a").unwrap().status, MachineStatus::Offline);
}

#[test]
fn heartbeat_timestamps_are_monotonic() {
    let mut state = registered();
    state.apply_event(&Event::MachineHeartbeat { id: "mch-a".into(), at_ms: 200 });
    state.apply_event(&Event::MachineHeartbeat { id: "mch-a".into(), at_ms: 100 });
    assert_eq!(state.get_machine("mch-a").unwrap().last_heartbeat_ms, 200);
}

#[test]
fn group_assignment_is_idempotent() {
    let mut state = registered();
    let event = Event::MachineGroupAssigned { id: "mch-a".into(), group: "web".into() };
    state.apply_event(&event);
    state.apply_event(&event);
    assert_eq!(state.get_machine("mch-a").unwrap().groups.len(), 1);
}

#[test]
fn metric_history_is_bounded() {
    let mut state = registered();
    for i in 0..(METRIC_HISTORY_LIMIT + 10) {
        state.apply_event(&Event::MetricRecorded {
            machine_id: "mch-a".into(),
            metric: MetricSnapshot { recorded_at_ms: i as u64, ..Default::default() },
        });
    }
    let history = state.metrics.get("mch-a").unwrap();
    assert_eq!(history.len(), METRIC_HISTORY_LIMIT);
    // Oldest entries were evicted.
    assert_eq!(history.first().unwrap().recorded_at_ms, 10);
    assert_eq!(state.latest_metric("mch-a").unwrap().recorded_at_ms, 369);
}

#[test]
fn metric_replay_is_idempotent() {
    let mut state = registered();
    let event = Event::MetricRecorded {
        machine_id: "mch-a".into(),
        metric: MetricSnapshot { recorded_at_ms: 5, ..Default::default() },
    };
    state.apply_event(&event);
    state.apply_event(&event);
    assert_eq!(state.metrics.get("mch-a").unwrap().len(), 1);
}
