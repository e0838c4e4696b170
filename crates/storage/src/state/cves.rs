// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CVE mirror and vulnerability-match state transitions.

use super::MaterializedState;
use fd_core::Event;

/// Completed-sync stats kept in memory.
const SYNC_HISTORY_LIMIT: usize = 50;

pub(super) fn apply(state: &mut MaterializedState, event: &Event) {
    match event {
        Event::CveSynced { records } => {
            for record in records {
                state.cves.insert(record.id.clone(), record.clone());
            }
        }

        Event::CveSyncCompleted { stats } => {
            // Replay guard: completion timestamps are unique per sync.
            if state
                .cve_sync_history
                .last()
                .map(|s| s.completed_at_ms == stats.completed_at_ms)
                .unwrap_or(false)
            {
                return;
            }
            state.cve_sync_history.push(stats.clone());
            if state.cve_sync_history.len() > SYNC_HISTORY_LIMIT {
                let excess = state.cve_sync_history.len() - SYNC_HISTORY_LIMIT;
                state.cve_sync_history.drain(..excess);
            }
        }

        Event::VulnerabilityMatchesRecomputed { machine_id, matches } => {
            state
                .vulnerability_matches
                .insert(machine_id.as_str().to_string(), matches.clone());
        }

        _ => {}
    }
}
