// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Users, roles, and machine access.

use serde::{Deserialize, Serialize};

crate::define_id! {
    /// Unique identifier for a user account.
    pub struct UserId("usr-");
}

/// Authorization role. Admins bypass per-machine access checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    User,
    Viewer,
}

impl Role {
    /// Whether this role may issue state-changing operations
    /// (commands, terminals, bulk jobs).
    pub fn can_operate(&self) -> bool {
        matches!(self, Role::Admin | Role::User)
    }
}

crate::simple_display! {
    Role {
        Admin => "admin",
        User => "user",
        Viewer => "viewer",
    }
}

/// One user account. Only the password hash is ever persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub password_hash: String,
    pub role: Role,
    pub active: bool,
    #[serde(default)]
    pub created_at_ms: u64,
}

crate::builder! {
    pub struct UserBuilder => User {
        into {
            id: UserId = UserId::from_string("usr-test"),
            username: String = "operator",
            password_hash: String = "",
        }
        set {
            role: Role = Role::Admin,
            active: bool = true,
            created_at_ms: u64 = 0,
        }
    }
}
