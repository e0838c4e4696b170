// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Security-event state transitions.
//!
//! Upsert decisions (dedup, cooldown, status preservation) are made by the
//! engine before the event is persisted; replay only has to store rows and
//! keep resolution monotonic.

use super::MaterializedState;
use fd_core::{Event, SecurityEventStatus};

pub(super) fn apply(state: &mut MaterializedState, event: &Event) {
    match event {
        Event::SecurityEventUpserted { event } => {
            state.security_events.insert(event.id.as_str().to_string(), event.clone());
        }

        Event::SecurityEventsResolved { machine_id, ids, at_ms } => {
            let selected = |id: &str| match ids {
                Some(ids) => ids.iter().any(|i| i.as_str() == id),
                None => true,
            };
            for row in state.security_events.values_mut() {
                if row.machine_id != *machine_id || row.status.is_resolved() {
                    continue;
                }
                if !selected(row.id.as_str()) {
                    continue;
                }
                row.status = SecurityEventStatus::Resolved;
                row.resolved_at_ms = Some(*at_ms);
                row.updated_at_ms = *at_ms;
            }
        }

        _ => {}
    }
}
