// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Frames on the browser socket (`/ws/web`).

use fd_core::{
    AuditEntry, Execution, JobStatus, Machine, MachineStatus, MetricSnapshot, SecurityEvent,
    SecurityEventId,
};
use serde::{Deserialize, Serialize};

/// Machine row as exposed to browsers. Secret material never leaves the
/// server, so this is a distinct type rather than a serde view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineView {
    pub id: String,
    pub hostname: String,
    pub ip: String,
    pub os_info: String,
    pub status: MachineStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
    #[serde(default)]
    pub last_heartbeat_ms: u64,
    #[serde(default)]
    pub created_at_ms: u64,
}

impl From<&Machine> for MachineView {
    fn from(machine: &Machine) -> Self {
        Self {
            id: machine.id.as_str().to_string(),
            hostname: machine.hostname.clone(),
            ip: machine.ip.clone(),
            os_info: machine.os_info.clone(),
            status: machine.status,
            groups: machine.groups.clone(),
            last_heartbeat_ms: machine.last_heartbeat_ms,
            created_at_ms: machine.created_at_ms,
        }
    }
}

/// Server→client broadcast frames, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WebServerFrame {
    NewMachine {
        machine: MachineView,
    },

    MachineStatusChanged {
        #[serde(rename = "machineId")]
        machine_id: String,
        status: MachineStatus,
    },

    MachineHeartbeat {
        #[serde(rename = "machineId")]
        machine_id: String,
    },

    MachineMetrics {
        #[serde(rename = "machineId")]
        machine_id: String,
        metric: MetricSnapshot,
    },

    SecurityEvent {
        event: SecurityEvent,
    },

    SecurityEventsResolved {
        #[serde(rename = "machineId")]
        machine_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ids: Option<Vec<SecurityEventId>>,
    },

    ScanProgress {
        #[serde(rename = "machineId")]
        machine_id: String,
        percent: u8,
        stage: String,
    },

    ScanCompleted {
        #[serde(rename = "machineId")]
        machine_id: String,
        #[serde(rename = "scanId")]
        scan_id: String,
    },

    JobUpdated {
        #[serde(rename = "jobId")]
        job_id: String,
        status: JobStatus,
    },

    JobExecutionUpdated {
        execution: Execution,
    },

    JobExecutionOutput {
        #[serde(rename = "executionId")]
        execution_id: String,
        chunk: String,
    },

    AuditLog {
        entry: AuditEntry,
    },

    TerminalSessionCreated {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "machineId")]
        machine_id: String,
    },

    TerminalOutput {
        #[serde(rename = "sessionId")]
        session_id: String,
        data: String,
    },
}

impl WebServerFrame {
    /// Execution update convenience wrapper used by the orchestrator
    /// broadcast path.
    pub fn execution_update(execution: Execution) -> Self {
        WebServerFrame::JobExecutionUpdated { execution }
    }

    /// Whether this frame is high-frequency noise that should only be
    /// logged at trace level.
    pub fn is_chatty(&self) -> bool {
        matches!(
            self,
            WebServerFrame::MachineHeartbeat { .. }
                | WebServerFrame::MachineMetrics { .. }
                | WebServerFrame::TerminalOutput { .. }
                | WebServerFrame::JobExecutionOutput { .. }
        )
    }
}

/// Client→server frames on the web socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WebClientFrame {
    SpawnTerminal {
        #[serde(rename = "machineId")]
        machine_id: String,
        #[serde(default)]
        cols: u16,
        #[serde(default)]
        rows: u16,
    },

    TerminalInput {
        #[serde(rename = "sessionId")]
        session_id: String,
        data: String,
    },

    TerminalResize {
        #[serde(rename = "sessionId")]
        session_id: String,
        cols: u16,
        rows: u16,
    },

    TriggerScan {
        #[serde(rename = "machineId")]
        machine_id: String,
    },
}
