// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Socket protocol for fleetd.
//!
//! Frames are UTF-8 JSON objects; every frame carries a `type` discriminator.
//! Privileged server↔agent messages travel in the secure envelope.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod agent;
mod envelope;
mod rest;
mod web;

pub use agent::{parse_agent_frame, AgentFrame, AgentSecurityEvent, RegisterFrame, ScannedPackage};
pub use envelope::{
    CancelCommandPayload, EnvelopeError, ExecuteCommandPayload, SecureEnvelope,
    SpawnTerminalPayload, TerminalInputPayload, TerminalResizePayload,
};
pub use rest::{
    ApiFault, CreateJobRequest, CveStatusView, DryRunReport, ExecutionView, JobView,
    ResolveRequest, ResolveResponse,
};
pub use web::{MachineView, WebClientFrame, WebServerFrame};

#[cfg(test)]
mod property_tests;
