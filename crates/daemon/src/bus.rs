// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WAL-backed event bus.
//!
//! `emit` is the single write path: append to the WAL, apply to
//! materialized state, write through the fleet cache, then fan derived
//! frames out to web clients. Engine code sees the state updated as soon
//! as `emit` returns.

use crate::registry::ConnectionRegistry;
use fd_core::{Event, Fault};
use fd_engine::EventSink;
use fd_storage::{FleetCache, MaterializedState, Wal};
use fd_wire::WebServerFrame;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{error, trace};

pub struct EventBus {
    wal: Mutex<Wal>,
    state: Arc<Mutex<MaterializedState>>,
    cache: Arc<Mutex<FleetCache>>,
    registry: Arc<ConnectionRegistry>,
}

impl EventBus {
    pub fn new(
        wal: Wal,
        state: Arc<Mutex<MaterializedState>>,
        cache: Arc<Mutex<FleetCache>>,
        registry: Arc<ConnectionRegistry>,
    ) -> Self {
        Self { wal: Mutex::new(wal), state, cache, registry }
    }

    /// Flush buffered WAL appends when the threshold or interval is due.
    pub fn maybe_flush(&self) {
        let mut wal = self.wal.lock();
        if wal.needs_flush() {
            if let Err(e) = wal.flush() {
                error!(error = %e, "WAL flush failed");
            }
        }
    }

    /// Force a flush (shutdown path).
    pub fn flush(&self) {
        if let Err(e) = self.wal.lock().flush() {
            error!(error = %e, "WAL flush failed");
        }
    }

    /// Last appended sequence, for snapshotting.
    pub fn write_seq(&self) -> u64 {
        self.wal.lock().write_seq()
    }

    pub fn mark_processed(&self, seq: u64) {
        self.wal.lock().mark_processed(seq)
    }

    /// Drop WAL entries made redundant by a snapshot at `seq`.
    pub fn truncate_before(&self, seq: u64) {
        if let Err(e) = self.wal.lock().truncate_before(seq) {
            error!(error = %e, "WAL truncation failed");
        }
    }

    /// Frames derived from one applied event. Execution updates read the
    /// post-apply row so the broadcast carries current output and status.
    fn derive_frames(&self, event: &Event) -> Vec<WebServerFrame> {
        let state = self.state.lock();
        match event {
            Event::MachineRegistered { machine } => {
                vec![WebServerFrame::NewMachine { machine: machine.into() }]
            }
            Event::MachineStatusChanged { id, status, .. } => {
                vec![WebServerFrame::MachineStatusChanged {
                    machine_id: id.as_str().to_string(),
                    status: *status,
                }]
            }
            Event::MachineHeartbeat { id, .. } => {
                vec![WebServerFrame::MachineHeartbeat { machine_id: id.as_str().to_string() }]
            }
            Event::MetricRecorded { machine_id, metric } => {
                vec![WebServerFrame::MachineMetrics {
                    machine_id: machine_id.as_str().to_string(),
                    metric: metric.clone(),
                }]
            }
            Event::SecurityEventUpserted { event } => {
                vec![WebServerFrame::SecurityEvent { event: event.clone() }]
            }
            Event::SecurityEventsResolved { machine_id, ids, .. } => {
                vec![WebServerFrame::SecurityEventsResolved {
                    machine_id: machine_id.as_str().to_string(),
                    ids: ids.clone(),
                }]
            }
            Event::ScanApplied { scan, .. } => {
                vec![WebServerFrame::ScanCompleted {
                    machine_id: scan.machine_id.as_str().to_string(),
                    scan_id: scan.id.as_str().to_string(),
                }]
            }
            Event::JobStatusChanged { id, status, .. } => {
                vec![WebServerFrame::JobUpdated {
                    job_id: id.as_str().to_string(),
                    status: *status,
                }]
            }
            Event::ExecutionStatusChanged { id, .. } => state
                .executions
                .get(id.as_str())
                .map(|execution| {
                    vec![WebServerFrame::JobExecutionUpdated { execution: execution.clone() }]
                })
                .unwrap_or_default(),
            Event::ExecutionOutput { id, chunk } => {
                vec![WebServerFrame::JobExecutionOutput {
                    execution_id: id.as_str().to_string(),
                    chunk: chunk.clone(),
                }]
            }
            Event::AuditRecorded { entry } => {
                vec![WebServerFrame::AuditLog { entry: entry.clone() }]
            }
            _ => Vec::new(),
        }
    }
}

impl EventSink for EventBus {
    fn emit(&self, event: Event) -> Result<(), Fault> {
        // 1. Durability first.
        {
            let mut wal = self.wal.lock();
            if let Err(e) = wal.append(&event) {
                error!(error = %e, event = event.name(), "WAL append failed");
                return Err(Fault::StoreUnavailable);
            }
            if wal.needs_flush() {
                if let Err(e) = wal.flush() {
                    error!(error = %e, "WAL flush failed");
                    return Err(Fault::StoreUnavailable);
                }
            }
        }

        // 2. Apply to state, then write through the cache.
        {
            let mut state = self.state.lock();
            state.apply_event(&event);
            self.cache.lock().apply(&event, &state);
        }

        trace!(event = %event.log_summary(), "event applied");

        // 3. Fan out to web clients.
        for frame in self.derive_frames(&event) {
            self.registry.broadcast_web(&frame);
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
