// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Read-hot fleet cache.
//!
//! Mirrors machines, their latest metric, and open-event counts for
//! broadcast and dashboard reads. Single writer: the daemon's event path
//! applies every mutation write-through; readers take snapshots and never
//! block the writer.

use crate::state::MaterializedState;
use fd_core::{Event, Machine, MetricSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-machine summary slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineSummary {
    pub machine: Machine,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_metric: Option<MetricSnapshot>,
    pub open_events: u32,
    pub ack_events: u32,
}

/// In-memory mirror of the read-hot state slice.
#[derive(Debug, Default)]
pub struct FleetCache {
    machines: HashMap<String, MachineSummary>,
}

impl FleetCache {
    /// Full rebuild from materialized state (boot, post-replay).
    pub fn rebuild(state: &MaterializedState) -> Self {
        let mut cache = Self::default();
        for (id, machine) in &state.machines {
            let (open_events, ack_events) = state.open_event_counts(id);
            cache.machines.insert(
                id.clone(),
                MachineSummary {
                    machine: machine.clone(),
                    latest_metric: state.latest_metric(id).cloned(),
                    open_events,
                    ack_events,
                },
            );
        }
        cache
    }

    /// Write-through update for one applied event.
    ///
    /// Security-event mutations re-derive counts from `state`, which has
    /// already applied the event.
    pub fn apply(&mut self, event: &Event, state: &MaterializedState) {
        match event {
            Event::MachineRegistered { machine } | Event::MachineRefreshed { machine } => {
                let entry = self
                    .machines
                    .entry(machine.id.as_str().to_string())
                    .or_insert_with(|| MachineSummary {
                        machine: machine.clone(),
                        latest_metric: None,
                        open_events: 0,
                        ack_events: 0,
                    });
                entry.machine = state
                    .machines
                    .get(machine.id.as_str())
                    .cloned()
                    .unwrap_or_else(|| machine.clone());
            }

            Event::MachineStatusChanged { id, .. }
            | Event::MachineHeartbeat { id, .. }
            | Event::MachineSecretNormalized { id, .. }
            | Event::MachineGroupAssigned { id, .. }
            | Event::MachineGroupUnassigned { id, .. } => {
                if let (Some(entry), Some(machine)) =
                    (self.machines.get_mut(id.as_str()), state.machines.get(id.as_str()))
                {
                    entry.machine = machine.clone();
                }
            }

            Event::MetricRecorded { machine_id, metric } => {
                if let Some(entry) = self.machines.get_mut(machine_id.as_str()) {
                    entry.latest_metric = Some(metric.clone());
                }
            }

            Event::SecurityEventUpserted { event } => {
                self.refresh_event_counts(event.machine_id.as_str(), state);
            }

            Event::SecurityEventsResolved { machine_id, .. } => {
                self.refresh_event_counts(machine_id.as_str(), state);
            }

            _ => {}
        }
    }

    fn refresh_event_counts(&mut self, machine_id: &str, state: &MaterializedState) {
        if let Some(entry) = self.machines.get_mut(machine_id) {
            let (open, ack) = state.open_event_counts(machine_id);
            entry.open_events = open;
            entry.ack_events = ack;
        }
    }

    pub fn get(&self, machine_id: &str) -> Option<&MachineSummary> {
        self.machines.get(machine_id)
    }

    /// Snapshot copy for broadcast iteration.
    pub fn snapshot(&self) -> Vec<MachineSummary> {
        let mut all: Vec<MachineSummary> = self.machines.values().cloned().collect();
        all.sort_by(|a, b| a.machine.hostname.cmp(&b.machine.hostname));
        all
    }

    pub fn len(&self) -> usize {
        self.machines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod tests;
