// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Failure taxonomy.
//!
//! Every externally visible failure maps to exactly one `Fault`, and every
//! fault has a stable machine-readable kind string. The UI maps kinds to
//! localized messages; internal error text never crosses the boundary.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The closed failure taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Fault {
    // -- protocol --
    #[error("message is missing the type discriminator")]
    MessageMissingType,
    #[error("message failed schema validation")]
    MessageMalformed,

    // -- auth --
    #[error("agent registration without a shared secret")]
    MissingAgentSecret,
    #[error("agent shared secret does not match")]
    InvalidAgentSecret,
    #[error("session is unknown or not valid for this machine")]
    SessionInvalid,
    #[error("session has expired")]
    SessionExpired,
    #[error("session lacks the required capability")]
    CapabilityMissing,
    #[error("critical command requires recent re-authentication")]
    ReauthRequired,

    // -- integrity / replay --
    #[error("envelope HMAC verification failed")]
    #[serde(rename = "HMACFailed")]
    HmacFailed,
    #[error("envelope timestamp outside the clock-skew window")]
    ReplayTimestampSkew,
    #[error("envelope nonce was already seen")]
    ReplayNonceSeen,

    // -- rate --
    #[error("per-session rate limit exceeded")]
    RateLimitExceeded,

    // -- authorization --
    #[error("role does not permit this operation")]
    ForbiddenRole,
    #[error("user has no access to this machine")]
    MachineAccessDenied,

    // -- resource --
    #[error("machine not found")]
    MachineNotFound,
    #[error("job not found")]
    JobNotFound,
    #[error("user not found")]
    UserNotFound,

    // -- state --
    #[error("operation is already running")]
    AlreadyRunning,
    #[error("connection superseded by a newer registration")]
    SupersededConnection,
    #[error("agent disconnected")]
    AgentDisconnected,

    // -- infrastructure --
    #[error("persistent store unavailable")]
    StoreUnavailable,
    #[error("upstream feed unavailable")]
    UpstreamUnavailable,
}

impl Fault {
    /// Stable machine-readable kind string.
    pub fn kind(&self) -> &'static str {
        match self {
            Fault::MessageMissingType => "MessageMissingType",
            Fault::MessageMalformed => "MessageMalformed",
            Fault::MissingAgentSecret => "MissingAgentSecret",
            Fault::InvalidAgentSecret => "InvalidAgentSecret",
            Fault::SessionInvalid => "SessionInvalid",
            Fault::SessionExpired => "SessionExpired",
            Fault::CapabilityMissing => "CapabilityMissing",
            Fault::ReauthRequired => "ReauthRequired",
            Fault::HmacFailed => "HMACFailed",
            Fault::ReplayTimestampSkew => "ReplayTimestampSkew",
            Fault::ReplayNonceSeen => "ReplayNonceSeen",
            Fault::RateLimitExceeded => "RateLimitExceeded",
            Fault::ForbiddenRole => "ForbiddenRole",
            Fault::MachineAccessDenied => "MachineAccessDenied",
            Fault::MachineNotFound => "MachineNotFound",
            Fault::JobNotFound => "JobNotFound",
            Fault::UserNotFound => "UserNotFound",
            Fault::AlreadyRunning => "AlreadyRunning",
            Fault::SupersededConnection => "SupersededConnection",
            Fault::AgentDisconnected => "AgentDisconnected",
            Fault::StoreUnavailable => "StoreUnavailable",
            Fault::UpstreamUnavailable => "UpstreamUnavailable",
        }
    }

    /// HTTP status this fault maps to at the REST boundary.
    pub fn http_status(&self) -> u16 {
        match self {
            Fault::MessageMissingType | Fault::MessageMalformed => 400,
            Fault::MissingAgentSecret
            | Fault::InvalidAgentSecret
            | Fault::SessionInvalid
            | Fault::SessionExpired
            | Fault::HmacFailed
            | Fault::ReplayTimestampSkew
            | Fault::ReplayNonceSeen => 401,
            Fault::CapabilityMissing
            | Fault::ReauthRequired
            | Fault::ForbiddenRole
            | Fault::MachineAccessDenied => 403,
            Fault::MachineNotFound | Fault::JobNotFound | Fault::UserNotFound => 404,
            Fault::AlreadyRunning | Fault::SupersededConnection | Fault::AgentDisconnected => 409,
            Fault::RateLimitExceeded => 429,
            Fault::StoreUnavailable | Fault::UpstreamUnavailable => 503,
        }
    }
}

#[cfg(test)]
#[path = "fault_tests.rs"]
mod tests;
