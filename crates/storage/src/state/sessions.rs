// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Terminal-session state transitions.

use super::MaterializedState;
use fd_core::Event;

pub(super) fn apply(state: &mut MaterializedState, event: &Event) {
    match event {
        Event::SessionIssued { session } => {
            state
                .sessions
                .entry(session.id.as_str().to_string())
                .or_insert_with(|| session.clone());
        }

        Event::SessionRevoked { id } => {
            if let Some(session) = state.sessions.get_mut(id.as_str()) {
                session.revoked = true;
            }
        }

        _ => {}
    }
}
