// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Frames arriving on the agent socket (`/ws/agent`).
//!
//! These are the unsigned, idempotent agent→server messages. Signed
//! server→agent messages use [`crate::SecureEnvelope`] instead.

use fd_core::{Fault, MetricSnapshot, ScanSummary};
use serde::{Deserialize, Serialize};

/// The initial `register` frame. Sent once, within the registration
/// timeout, before any other frame is accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterFrame {
    pub machine_id: String,
    pub hostname: String,
    pub ip: String,
    pub os_info: String,
    /// Plaintext shared secret (the transport is TLS); hashed on arrival
    /// and compared against the stored hash.
    #[serde(default)]
    pub secret_key: Option<String>,
}

/// One installed package as reported inside a scan frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannedPackage {
    pub name: String,
    pub version: String,
    pub manager: String,
    #[serde(default)]
    pub security_update: bool,
    #[serde(default)]
    pub update_available: bool,
}

/// Agent→server frames, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentFrame {
    Register(RegisterFrame),

    Heartbeat,

    Metric {
        #[serde(flatten)]
        metric: MetricSnapshot,
    },

    /// Full package scan result.
    Scan {
        summary: ScanSummary,
        #[serde(default)]
        packages: Vec<ScannedPackage>,
        /// Security findings embedded in the scan (shorter integrity
        /// cooldown applies on this path).
        #[serde(default)]
        events: Vec<AgentSecurityEvent>,
    },

    ScanProgress {
        #[serde(default)]
        percent: u8,
        #[serde(default)]
        stage: String,
    },

    /// Direct security event report.
    Event {
        #[serde(flatten)]
        event: AgentSecurityEvent,
    },

    CommandOutput {
        #[serde(rename = "commandId")]
        command_id: String,
        chunk: String,
    },

    CommandCompleted {
        #[serde(rename = "commandId")]
        command_id: String,
        #[serde(rename = "exitCode")]
        exit_code: i32,
    },

    TerminalOutput {
        #[serde(rename = "sessionId")]
        session_id: String,
        data: String,
    },

    TerminalSessionCreated {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
}

/// A raw security finding from an agent, before dedup and classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSecurityEvent {
    /// Event type ("failed_auth", "integrity", "drift", ...).
    pub kind: String,
    pub message: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Parse one agent frame, enforcing the `type` discriminator first.
///
/// A frame without `type` maps to [`Fault::MessageMissingType`]; anything
/// else that fails schema validation (including unknown types) maps to
/// [`Fault::MessageMalformed`].
pub fn parse_agent_frame(text: &str) -> Result<AgentFrame, Fault> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|_| Fault::MessageMalformed)?;
    if !value.is_object() {
        return Err(Fault::MessageMalformed);
    }
    if value.get("type").and_then(|t| t.as_str()).is_none() {
        return Err(Fault::MessageMissingType);
    }
    serde_json::from_value(value).map_err(|_| Fault::MessageMalformed)
}

#[cfg(test)]
#[path = "agent_tests.rs"]
mod tests;
