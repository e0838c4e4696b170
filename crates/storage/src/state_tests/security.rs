// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::state::MaterializedState;
use fd_core::{Event, SecurityEvent, SecurityEventStatus};

fn upsert(state: &mut MaterializedState, event: SecurityEvent) {
    state.apply_event(&Event::SecurityEventUpserted { event });
}

fn event(id: &str, fingerprint: &str) -> SecurityEvent {
    SecurityEvent::builder().id(id).fingerprint(fingerprint).build()
}

#[test]
fn upsert_stores_by_id() {
    let mut state = MaterializedState::default();
    upsert(&mut state, event("sev-1", "failed_auth:10.0.0.5"));
    assert_eq!(state.security_events.len(), 1);
}

#[test]
fn fingerprint_lookup_prefers_non_resolved_rows() {
    let mut state = MaterializedState::default();

    let mut resolved = event("sev-1", "failed_auth:10.0.0.5");
    resolved.status = SecurityEventStatus::Resolved;
    resolved.updated_at_ms = 900;
    upsert(&mut state, resolved);

    let mut open = event("sev-2", "failed_auth:10.0.0.5");
    open.updated_at_ms = 100;
    upsert(&mut state, open);

    let found = state.security_event_by_fingerprint("mch-test", "failed_auth:10.0.0.5").unwrap();
    assert_eq!(found.id.as_str(), "sev-2");
}

#[test]
fn resolve_all_flips_open_and_ack() {
    let mut state = MaterializedState::default();
    upsert(&mut state, event("sev-1", "a:1"));
    let mut acked = event("sev-2", "b:2");
    acked.status = SecurityEventStatus::Ack;
    upsert(&mut state, acked);

    state.apply_event(&Event::SecurityEventsResolved {
        machine_id: "mch-test".into(),
        ids: None,
        at_ms: 777,
    });

    for row in state.security_events.values() {
        assert_eq!(row.status, SecurityEventStatus::Resolved);
        assert_eq!(row.resolved_at_ms, Some(777));
    }
}

#[test]
fn partial_resolve_only_touches_listed_ids() {
    let mut state = MaterializedState::default();
    upsert(&mut state, event("sev-1", "a:1"));
    upsert(&mut state, event("sev-2", "b:2"));

    state.apply_event(&Event::SecurityEventsResolved {
        machine_id: "mch-test".into(),
        ids: Some(vec!["sev-1".into()]),
        at_ms: 10,
    });

    assert!(state.security_events.get("sev-1").unwrap().status.is_resolved());
    assert_eq!(state.security_events.get("sev-2").unwrap().status, SecurityEventStatus::Open);
}

#[test]
fn resolve_does_not_rewrite_already_resolved_rows() {
    let mut state = MaterializedState::default();
    let mut resolved = event("sev-1", "a:1");
    resolved.status = SecurityEventStatus::Resolved;
    resolved.resolved_at_ms = Some(5);
    upsert(&mut state, resolved);

    state.apply_event(&Event::SecurityEventsResolved {
        machine_id: "mch-test".into(),
        ids: None,
        at_ms: 99,
    });

    assert_eq!(state.security_events.get("sev-1").unwrap().resolved_at_ms, Some(5));
}

#[test]
fn open_event_counts_split_by_status() {
    let mut state = MaterializedState::default();
    upsert(&mut state, event("sev-1", "a:1"));
    let mut acked = event("sev-2", "b:2");
    acked.status = SecurityEventStatus::Ack;
    upsert(&mut state, acked);
    let mut resolved = event("sev-3", "c:3");
    resolved.status = SecurityEventStatus::Resolved;
    upsert(&mut state, resolved);

    assert_eq!(state.open_event_counts("mch-test"), (1, 1));
}
