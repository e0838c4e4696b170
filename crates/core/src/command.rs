// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ad-hoc shell commands and the server-side command policy.

use crate::machine::MachineId;
use serde::{Deserialize, Serialize};

crate::define_id! {
    /// Unique identifier for a single queued or ad-hoc command.
    pub struct CommandId("cmd-");
}

/// Lifecycle of a command. Transitions are totally ordered:
/// pending → running → {success, failed, aborted}; no regression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Pending,
    Running,
    Success,
    Failed,
    Aborted,
}

impl CommandStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CommandStatus::Success | CommandStatus::Failed | CommandStatus::Aborted)
    }

    /// Rank in the pending → running → terminal ordering, used to reject
    /// status regressions during replay.
    pub fn rank(&self) -> u8 {
        match self {
            CommandStatus::Pending => 0,
            CommandStatus::Running => 1,
            CommandStatus::Success | CommandStatus::Failed | CommandStatus::Aborted => 2,
        }
    }
}

crate::simple_display! {
    CommandStatus {
        Pending => "pending",
        Running => "running",
        Success => "success",
        Failed => "failed",
        Aborted => "aborted",
    }
}

/// A shell command issued against one machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub id: CommandId,
    pub machine_id: MachineId,
    pub command: String,
    pub status: CommandStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub created_at_ms: u64,
    /// Epoch ms the command was handed to the agent; used for the
    /// expected-disconnect grace window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispatched_at_ms: Option<u64>,
}

/// Server-maintained command policy: expected-disconnect detection and the
/// critical-command gate.
pub mod command_policy {
    /// Commands after which losing the agent socket is not a failure.
    /// Reconnection within the grace window marks the command successful.
    const EXPECTED_DISCONNECT_EXACT: &[&str] = &[
        "reboot",
        "shutdown",
        "poweroff",
        "halt",
        "init 0",
        "init 6",
        "systemctl reboot",
        "systemctl poweroff",
        "systemctl halt",
    ];

    const EXPECTED_DISCONNECT_SUBSTRINGS: &[&str] = &["agent update", "install-agent.sh"];

    /// Whether an agent disconnect shortly after dispatching this command
    /// should be treated as expected rather than a failure.
    pub fn is_expected_disconnect(command: &str) -> bool {
        let trimmed = command.trim();
        if EXPECTED_DISCONNECT_EXACT.iter().any(|c| trimmed == *c) {
            return true;
        }
        EXPECTED_DISCONNECT_SUBSTRINGS.iter().any(|s| trimmed.contains(s))
    }

    /// Patterns that require a fresh re-auth token before dispatch.
    /// Matching is substring-based on the trimmed command. Destructive
    /// `rm` invocations are detected separately by flag, not by literal
    /// target, so `rm -rf ~`, `rm -rf $HOME`, or `rm -r -f *` are gated
    /// the same as `rm -rf /`.
    const CRITICAL_SUBSTRINGS: &[&str] = &[
        "mkfs",
        "dd if=",
        "chmod -R",
        "chown -R",
        "iptables -F",
        "iptables --flush",
        "ufw disable",
        "userdel",
        "passwd root",
        "apt purge",
        "apt-get purge",
        "yum remove",
        "dnf remove",
        "systemctl disable",
        "systemctl mask",
    ];

    /// Whether the command line contains an `rm` invocation combining
    /// recursive and force flags, regardless of target. Handles clustered
    /// short flags (`-rf`, `-fr`), separated ones (`-r -f`), long forms,
    /// and path-prefixed binaries (`/bin/rm`); scanning stops at shell
    /// separators so flags of a later command are not misattributed.
    fn is_destructive_rm(command: &str) -> bool {
        let tokens: Vec<&str> = command.split_whitespace().collect();
        for (i, token) in tokens.iter().enumerate() {
            let bin = token.rsplit('/').next().unwrap_or(token);
            if bin != "rm" {
                continue;
            }
            let mut recursive = false;
            let mut force = false;
            for arg in &tokens[i + 1..] {
                if matches!(*arg, "&&" | "||" | ";" | "|") {
                    break;
                }
                if *arg == "--recursive" {
                    recursive = true;
                } else if *arg == "--force" {
                    force = true;
                } else if arg.starts_with('-') && !arg.starts_with("--") {
                    recursive |= arg.contains('r') || arg.contains('R');
                    force |= arg.contains('f');
                }
            }
            if recursive && force {
                return true;
            }
        }
        false
    }

    /// Returns the matched critical pattern, if any. Expected-disconnect
    /// commands (reboot/shutdown family) are always critical.
    pub fn critical_pattern(command: &str) -> Option<&'static str> {
        let trimmed = command.trim();
        if is_expected_disconnect(trimmed) {
            return Some("reboot/shutdown");
        }
        if is_destructive_rm(trimmed) {
            return Some("destructive rm");
        }
        CRITICAL_SUBSTRINGS.iter().find(|p| trimmed.contains(**p)).copied()
    }
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;
