// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Terminal session tokens and the capability set they authorize.

use crate::machine::MachineId;
use crate::user::UserId;
use serde::{Deserialize, Serialize};

crate::define_id! {
    /// Opaque identifier for a terminal session token.
    pub struct SessionId("ses-");
}

/// Closed set of privileged actions a session token may authorize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    OpenTerminal,
    TerminalInput,
    TerminalResize,
    ExecuteCommand,
}

impl Capability {
    /// The capability a signed envelope of the given `type` requires.
    /// Unknown types require nothing here; they are rejected earlier by
    /// schema validation.
    pub fn required_for(envelope_type: &str) -> Option<Capability> {
        match envelope_type {
            "spawn_terminal" => Some(Capability::OpenTerminal),
            "terminal_input" => Some(Capability::TerminalInput),
            "terminal_resize" => Some(Capability::TerminalResize),
            "execute_command" | "cancel_command" => Some(Capability::ExecuteCommand),
            _ => None,
        }
    }

    /// Default capability set minted for an interactive terminal session.
    pub fn terminal_defaults() -> Vec<Capability> {
        vec![Capability::OpenTerminal, Capability::TerminalInput, Capability::TerminalResize]
    }
}

crate::simple_display! {
    Capability {
        OpenTerminal => "open_terminal",
        TerminalInput => "terminal_input",
        TerminalResize => "terminal_resize",
        ExecuteCommand => "execute_command",
    }
}

/// A minted session token. Signed with the server-wide secret so stateless
/// paths can verify it; stored as well so it can be revoked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSession {
    pub id: SessionId,
    pub user_id: UserId,
    pub machine_id: MachineId,
    pub capabilities: Vec<Capability>,
    pub issued_at_ms: u64,
    pub expires_at_ms: u64,
    #[serde(default)]
    pub revoked: bool,
}

impl TerminalSession {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }

    pub fn grants(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
