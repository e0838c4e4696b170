// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Audit-trail state transitions.

use super::{MaterializedState, AUDIT_LOG_LIMIT};
use fd_core::Event;

pub(super) fn apply(state: &mut MaterializedState, event: &Event) {
    let Event::AuditRecorded { entry } = event else {
        return;
    };

    // Replay guard: entries carry unique IDs.
    if state.audit_log.iter().rev().take(64).any(|e| e.id == entry.id) {
        return;
    }

    state.audit_log.push(entry.clone());
    if state.audit_log.len() > AUDIT_LOG_LIMIT {
        let excess = state.audit_log.len() - AUDIT_LOG_LIMIT;
        state.audit_log.drain(..excess);
    }
}
