// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test helpers, available to downstream crates via the
//! `test-support` feature.

use crate::machine::{Machine, MachineId, MachineStatus};

/// A well-formed 64-hex shared secret made of one repeated character.
pub fn hex_secret(c: char) -> String {
    std::iter::repeat(c).take(64).collect()
}

/// Online machine with the given id and hostname, no secret material.
pub fn online_machine(id: &str, hostname: &str) -> Machine {
    Machine {
        id: MachineId::from_string(id),
        hostname: hostname.to_string(),
        ip: "10.0.0.1".to_string(),
        os_info: "Debian GNU/Linux 12".to_string(),
        status: MachineStatus::Online,
        secret_hash: String::new(),
        secret_enc: String::new(),
        groups: Vec::new(),
        last_heartbeat_ms: 0,
        created_at_ms: 0,
    }
}
