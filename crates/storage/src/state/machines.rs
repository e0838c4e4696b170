// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Machine and metric state transitions.

use super::{MaterializedState, METRIC_HISTORY_LIMIT};
use fd_core::Event;

pub(super) fn apply(state: &mut MaterializedState, event: &Event) {
    match event {
        Event::MachineRegistered { machine } | Event::MachineRefreshed { machine } => {
            // Re-registration upserts identity fields but must not lose
            // group membership assigned out of band.
            let groups = state
                .machines
                .get(machine.id.as_str())
                .map(|existing| existing.groups.clone())
                .filter(|g| !g.is_empty());
            let mut row = machine.clone();
            if let Some(groups) = groups {
                row.groups = groups;
            }
            state.machines.insert(row.id.as_str().to_string(), row);
        }

        Event::MachineStatusChanged { id, status, at_ms } => {
            if let Some(machine) = state.machines.get_mut(id.as_str()) {
                machine.status = *status;
                if machine.last_heartbeat_ms < *at_ms {
                    machine.last_heartbeat_ms = *at_ms;
                }
            }
        }

        Event::MachineHeartbeat { id, at_ms } => {
            if let Some(machine) = state.machines.get_mut(id.as_str()) {
                if machine.last_heartbeat_ms < *at_ms {
                    machine.last_heartbeat_ms = *at_ms;
                }
            }
        }

        Event::MachineSecretNormalized { id, secret_hash, secret_enc } => {
            if let Some(machine) = state.machines.get_mut(id.as_str()) {
                machine.secret_hash = secret_hash.clone();
                machine.secret_enc = secret_enc.clone();
            }
        }

        Event::MachineGroupAssigned { id, group } => {
            if let Some(machine) = state.machines.get_mut(id.as_str()) {
                if !machine.groups.iter().any(|g| g == group) {
                    machine.groups.push(group.clone());
                }
            }
        }

        Event::MachineGroupUnassigned { id, group } => {
            if let Some(machine) = state.machines.get_mut(id.as_str()) {
                machine.groups.retain(|g| g != group);
            }
        }

        Event::MetricRecorded { machine_id, metric } => {
            let history = state.metrics.entry(machine_id.as_str().to_string()).or_default();
            // Replay guard: the same sample (by timestamp) is not appended twice.
            if history.last().map(|m| m.recorded_at_ms) == Some(metric.recorded_at_ms) {
                return;
            }
            history.push(metric.clone());
            if history.len() > METRIC_HISTORY_LIMIT {
                let excess = history.len() - METRIC_HISTORY_LIMIT;
                history.drain(..excess);
            }
        }

        _ => {}
    }
}
