// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The secure envelope carrying every privileged server↔agent message.
//!
//! Canonicalization invariant: the HMAC covers the exact JSON string
//! `{"type":T,"sessionId":S,"machineId":M,"payload":P,"nonce":N,"timestamp":TS}`
//! where `P` is the payload's serialized form verbatim. The payload is held
//! as raw JSON text end to end; verifiers never parse-then-reserialize it,
//! so byte-level differences (key order, whitespace) cannot desync the two
//! sides.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("payload is not valid JSON")]
    InvalidPayload(#[source] serde_json::Error),

    #[error("envelope serialization failed")]
    Serialize(#[source] serde_json::Error),
}

/// Signed message envelope. Field order matters: serialization order is the
/// canonical signing order, with `hmac` appended last.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecureEnvelope {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub session_id: String,
    pub machine_id: String,
    /// Payload JSON, preserved byte-for-byte from the sender.
    pub payload: Box<RawValue>,
    pub nonce: String,
    pub timestamp: u64,
    /// Hex-encoded HMAC-SHA-256 over [`SecureEnvelope::signing_input`].
    #[serde(default)]
    pub hmac: String,
}

impl Clone for SecureEnvelope {
    fn clone(&self) -> Self {
        Self {
            msg_type: self.msg_type.clone(),
            session_id: self.session_id.clone(),
            machine_id: self.machine_id.clone(),
            payload: self.payload.to_owned(),
            nonce: self.nonce.clone(),
            timestamp: self.timestamp,
            hmac: self.hmac.clone(),
        }
    }
}

impl SecureEnvelope {
    /// Build an unsigned envelope around an already-serialized payload.
    pub fn unsigned(
        msg_type: impl Into<String>,
        session_id: impl Into<String>,
        machine_id: impl Into<String>,
        payload_json: String,
        nonce: impl Into<String>,
        timestamp: u64,
    ) -> Result<Self, EnvelopeError> {
        let payload = RawValue::from_string(payload_json).map_err(EnvelopeError::InvalidPayload)?;
        Ok(Self {
            msg_type: msg_type.into(),
            session_id: session_id.into(),
            machine_id: machine_id.into(),
            payload,
            nonce: nonce.into(),
            timestamp,
            hmac: String::new(),
        })
    }

    /// Serialize a typed payload and wrap it.
    pub fn for_payload<P: Serialize>(
        msg_type: impl Into<String>,
        session_id: impl Into<String>,
        machine_id: impl Into<String>,
        payload: &P,
        nonce: impl Into<String>,
        timestamp: u64,
    ) -> Result<Self, EnvelopeError> {
        let payload_json = serde_json::to_string(payload).map_err(EnvelopeError::Serialize)?;
        Self::unsigned(msg_type, session_id, machine_id, payload_json, nonce, timestamp)
    }

    /// The canonical byte string the HMAC is computed over.
    ///
    /// Senders and verifiers both call this; the payload text is spliced in
    /// verbatim.
    pub fn signing_input(&self) -> String {
        // String fields go through serde_json to get exact JSON escaping.
        let quote = |s: &str| serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string());
        format!(
            r#"{{"type":{},"sessionId":{},"machineId":{},"payload":{},"nonce":{},"timestamp":{}}}"#,
            quote(&self.msg_type),
            quote(&self.session_id),
            quote(&self.machine_id),
            self.payload.get(),
            quote(&self.nonce),
            self.timestamp,
        )
    }

    /// Decode the payload into a typed structure.
    pub fn payload_as<'a, P: Deserialize<'a>>(&'a self) -> Result<P, serde_json::Error> {
        serde_json::from_str(self.payload.get())
    }
}

/// Payload of an `execute_command` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteCommandPayload {
    /// Command or execution row this run reports back against.
    pub command_id: String,
    pub command: String,
}

/// Payload of a `cancel_command` envelope (orchestrator kill switch).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelCommandPayload {
    pub command_id: String,
}

/// Payload of a `spawn_terminal` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnTerminalPayload {
    #[serde(default)]
    pub cols: u16,
    #[serde(default)]
    pub rows: u16,
}

/// Payload of a `terminal_input` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalInputPayload {
    pub data: String,
}

/// Payload of a `terminal_resize` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalResizePayload {
    pub cols: u16,
    pub rows: u16,
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;
