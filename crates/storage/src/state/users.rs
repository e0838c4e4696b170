// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! User and machine-access state transitions.

use super::MaterializedState;
use fd_core::Event;

pub(super) fn apply(state: &mut MaterializedState, event: &Event) {
    match event {
        Event::UserCreated { user } => {
            state.users.entry(user.id.as_str().to_string()).or_insert_with(|| user.clone());
        }

        Event::UserDeactivated { id } => {
            if let Some(user) = state.users.get_mut(id.as_str()) {
                user.active = false;
            }
        }

        Event::MachineAccessGranted { user_id, machine_id } => {
            let machines = state.machine_access.entry(user_id.as_str().to_string()).or_default();
            if !machines.iter().any(|m| m == machine_id.as_str()) {
                machines.push(machine_id.as_str().to_string());
            }
        }

        Event::MachineAccessRevoked { user_id, machine_id } => {
            if let Some(machines) = state.machine_access.get_mut(user_id.as_str()) {
                machines.retain(|m| m != machine_id.as_str());
            }
        }

        _ => {}
    }
}
