// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Connection registry: live agent and web-client sockets.
//!
//! Both maps mutate under one lock so a machine never has two concurrent
//! live sockets; a second registration supersedes the first, which is
//! closed with reason "superseded". Broadcast iterates a snapshot of the
//! senders, never holding the lock across sends.

use async_trait::async_trait;
use fd_core::{Fault, MachineId, Role, UserId};
use fd_engine::Dispatch;
use fd_wire::{SecureEnvelope, WebServerFrame};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Commands pushed to a socket's writer task.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketCommand {
    /// Send one text frame.
    Send(String),
    /// Close the socket with a policy reason.
    Close(&'static str),
}

/// One live agent socket.
#[derive(Clone)]
pub struct AgentHandle {
    pub conn_id: u64,
    pub sender: mpsc::UnboundedSender<SocketCommand>,
}

/// One live web-client socket.
#[derive(Clone)]
pub struct WebHandle {
    pub client_id: String,
    pub user_id: UserId,
    pub role: Role,
    pub sender: mpsc::UnboundedSender<SocketCommand>,
}

#[derive(Default)]
struct Maps {
    agents: HashMap<String, AgentHandle>,
    web: HashMap<String, WebHandle>,
}

/// The registry itself. One logical lock serializes all mutations.
#[derive(Default)]
pub struct ConnectionRegistry {
    maps: Mutex<Maps>,
    next_conn_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_conn_id(&self) -> u64 {
        self.next_conn_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Register an agent socket. A previous live socket for the machine
    /// is superseded: it gets a close command and is returned.
    pub fn register_agent(
        &self,
        machine_id: &MachineId,
        handle: AgentHandle,
    ) -> Option<AgentHandle> {
        let previous = {
            let mut maps = self.maps.lock();
            maps.agents.insert(machine_id.as_str().to_string(), handle)
        };
        if let Some(ref old) = previous {
            warn!(machine = %machine_id, old_conn = old.conn_id, "agent connection superseded");
            let _ = old.sender.send(SocketCommand::Close("superseded"));
        }
        previous
    }

    /// Remove an agent socket, but only if it is still the registered
    /// one (a superseded socket must not evict its successor).
    pub fn unregister_agent(&self, machine_id: &MachineId, conn_id: u64) -> bool {
        let mut maps = self.maps.lock();
        match maps.agents.get(machine_id.as_str()) {
            Some(current) if current.conn_id == conn_id => {
                maps.agents.remove(machine_id.as_str());
                true
            }
            _ => false,
        }
    }

    pub fn agent(&self, machine_id: &MachineId) -> Option<AgentHandle> {
        self.maps.lock().agents.get(machine_id.as_str()).cloned()
    }

    pub fn agent_count(&self) -> usize {
        self.maps.lock().agents.len()
    }

    /// Whether a machine has a live agent socket.
    pub fn has_agent(&self, machine_id: &MachineId) -> bool {
        self.maps.lock().agents.contains_key(machine_id.as_str())
    }

    /// Machines with a live socket right now.
    pub fn connected_machines(&self) -> Vec<MachineId> {
        self.maps
            .lock()
            .agents
            .keys()
            .map(|id| MachineId::from_string(id))
            .collect()
    }

    pub fn register_web(&self, handle: WebHandle) {
        self.maps.lock().web.insert(handle.client_id.clone(), handle);
    }

    pub fn unregister_web(&self, client_id: &str) {
        self.maps.lock().web.remove(client_id);
    }

    pub fn web_client(&self, client_id: &str) -> Option<WebHandle> {
        self.maps.lock().web.get(client_id).cloned()
    }

    /// Broadcast one frame to every web client.
    pub fn broadcast_web(&self, frame: &WebServerFrame) {
        let Ok(text) = serde_json::to_string(frame) else {
            return;
        };
        let targets: Vec<WebHandle> = self.maps.lock().web.values().cloned().collect();
        for handle in targets {
            if handle.sender.send(SocketCommand::Send(text.clone())).is_err() {
                debug!(client = %handle.client_id, "dropping dead web sender");
                self.unregister_web(&handle.client_id);
            }
        }
    }

    /// Send one frame to a single web client.
    pub fn send_web(&self, client_id: &str, frame: &WebServerFrame) -> bool {
        let Ok(text) = serde_json::to_string(frame) else {
            return false;
        };
        match self.web_client(client_id) {
            Some(handle) => handle.sender.send(SocketCommand::Send(text)).is_ok(),
            None => false,
        }
    }

    /// Send one raw text frame to a machine's agent.
    pub fn send_agent_text(&self, machine_id: &MachineId, text: String) -> Result<(), Fault> {
        let handle = self.agent(machine_id).ok_or(Fault::AgentDisconnected)?;
        handle
            .sender
            .send(SocketCommand::Send(text))
            .map_err(|_| Fault::AgentDisconnected)
    }

    /// Ask an agent socket's writer to close with a policy reason.
    pub fn close_agent(&self, machine_id: &MachineId, reason: &'static str) {
        if let Some(handle) = self.agent(machine_id) {
            let _ = handle.sender.send(SocketCommand::Close(reason));
        }
    }
}

#[async_trait]
impl Dispatch for ConnectionRegistry {
    async fn send_envelope(
        &self,
        machine_id: &MachineId,
        envelope: SecureEnvelope,
    ) -> Result<(), Fault> {
        let text = serde_json::to_string(&envelope).map_err(|_| Fault::MessageMalformed)?;
        self.send_agent_text(machine_id, text)
    }

    fn is_connected(&self, machine_id: &MachineId) -> bool {
        self.maps.lock().agents.contains_key(machine_id.as_str())
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
