// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only audit trail entries.

use crate::machine::MachineId;
use crate::user::UserId;
use serde::{Deserialize, Serialize};

crate::define_id! {
    /// Unique identifier for an audit entry.
    pub struct AuditId("aud-");
}

/// Severity attached to an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSeverity {
    Info,
    Warning,
    Error,
}

crate::simple_display! {
    AuditSeverity {
        Info => "info",
        Warning => "warning",
        Error => "error",
    }
}

/// Audited action kinds. The serialized names are stable strings the UI and
/// operators key on; do not rename.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditAction {
    // Protocol and envelope verification failures, one per check.
    MessageMissingTypeRejected,
    MessageMalformedRejected,
    ReplayTimestampSkew,
    ReplayNonceSeen,
    SessionInvalid,
    CapabilityMissing,
    RateLimitExceeded,
    HMACFailed,

    // Agent lifecycle.
    AgentRegistered,
    AgentAuthFailed,
    AgentSecretNormalized,
    AgentDisconnected,
    ExpectedDisconnectAssumedSuccess,
    /// Agent-forwarded report whose action has no dedicated kind; the
    /// agent's own action name travels in the details.
    AgentReported,

    // Terminal sessions.
    TerminalSessionOpened,
    TerminalSessionClosed,

    // Command gate.
    ReauthRequired,
    CriticalCommandDispatched,

    // Bulk jobs.
    #[serde(rename = "BULK_JOB_CREATED")]
    BulkJobCreated,
    #[serde(rename = "BULK_JOB_ABORTED")]
    BulkJobAborted,

    // Authorization.
    MachineAccessDenied,
    ForbiddenRole,
    WebAuthFailed,

    // User administration.
    UserCreated,
    UserDeactivated,
    MachineAccessGranted,
    MachineAccessRevoked,

    // CVE mirror.
    CveSyncCompleted,
    CveSyncFailed,
}

impl AuditAction {
    /// Default severity for this action kind.
    pub fn severity(&self) -> AuditSeverity {
        match self {
            AuditAction::AgentRegistered
            | AuditAction::AgentReported
            | AuditAction::TerminalSessionOpened
            | AuditAction::TerminalSessionClosed
            | AuditAction::BulkJobCreated
            | AuditAction::UserCreated
            | AuditAction::MachineAccessGranted
            | AuditAction::MachineAccessRevoked
            | AuditAction::CveSyncCompleted
            | AuditAction::CriticalCommandDispatched => AuditSeverity::Info,

            AuditAction::MessageMissingTypeRejected
            | AuditAction::MessageMalformedRejected
            | AuditAction::ReplayTimestampSkew
            | AuditAction::ReplayNonceSeen
            | AuditAction::SessionInvalid
            | AuditAction::CapabilityMissing
            | AuditAction::RateLimitExceeded
            | AuditAction::AgentDisconnected
            | AuditAction::ExpectedDisconnectAssumedSuccess
            | AuditAction::ReauthRequired
            | AuditAction::BulkJobAborted
            | AuditAction::MachineAccessDenied
            | AuditAction::ForbiddenRole
            | AuditAction::WebAuthFailed
            | AuditAction::UserDeactivated
            | AuditAction::AgentSecretNormalized => AuditSeverity::Warning,

            AuditAction::HMACFailed
            | AuditAction::AgentAuthFailed
            | AuditAction::CveSyncFailed => AuditSeverity::Error,
        }
    }
}

/// One append-only audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: AuditId,
    pub action: AuditAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_id: Option<MachineId>,
    pub severity: AuditSeverity,
    /// Structured context; never carries internal exception text.
    #[serde(default)]
    pub details: serde_json::Value,
    #[serde(default)]
    pub created_at_ms: u64,
}

impl AuditEntry {
    /// New entry with the action's default severity.
    pub fn new(action: AuditAction, created_at_ms: u64) -> Self {
        Self {
            id: AuditId::new(),
            action,
            user_id: None,
            machine_id: None,
            severity: action.severity(),
            details: serde_json::Value::Null,
            created_at_ms,
        }
    }

    pub fn with_machine(mut self, machine_id: MachineId) -> Self {
        self.machine_id = Some(machine_id);
        self
    }

    pub fn with_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

#[cfg(test)]
#[path = "audit_tests.rs"]
mod tests;
