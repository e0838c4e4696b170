// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory seam implementations for engine and daemon tests.

use crate::seams::{Dispatch, EventSink};
use async_trait::async_trait;
use fd_core::{Event, Fault, MachineId};
use fd_storage::MaterializedState;
use fd_wire::SecureEnvelope;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// Sink that applies events straight to shared state and records them.
pub struct MemorySink {
    state: Arc<Mutex<MaterializedState>>,
    pub events: Mutex<Vec<Event>>,
}

impl MemorySink {
    pub fn new(state: Arc<Mutex<MaterializedState>>) -> Self {
        Self { state, events: Mutex::new(Vec::new()) }
    }

    /// Names of all recorded events, for order assertions.
    pub fn event_names(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(|e| e.name()).collect()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: Event) -> Result<(), Fault> {
        self.state.lock().apply_event(&event);
        self.events.lock().push(event);
        Ok(())
    }
}

/// Dispatch stub: records envelopes, connectivity is scripted.
#[derive(Default)]
pub struct MockDispatch {
    pub sent: Mutex<Vec<(MachineId, SecureEnvelope)>>,
    offline: Mutex<HashSet<String>>,
}

impl MockDispatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a machine as having no live socket.
    pub fn set_offline(&self, machine_id: &MachineId) {
        self.offline.lock().insert(machine_id.as_str().to_string());
    }

    pub fn set_online(&self, machine_id: &MachineId) {
        self.offline.lock().remove(machine_id.as_str());
    }

    /// Envelopes sent so far, oldest first.
    pub fn take_sent(&self) -> Vec<(MachineId, SecureEnvelope)> {
        std::mem::take(&mut *self.sent.lock())
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }
}

#[async_trait]
impl Dispatch for MockDispatch {
    async fn send_envelope(
        &self,
        machine_id: &MachineId,
        envelope: SecureEnvelope,
    ) -> Result<(), Fault> {
        if self.offline.lock().contains(machine_id.as_str()) {
            return Err(Fault::AgentDisconnected);
        }
        self.sent.lock().push((*machine_id, envelope));
        Ok(())
    }

    fn is_connected(&self, machine_id: &MachineId) -> bool {
        !self.offline.lock().contains(machine_id.as_str())
    }
}
