// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Property tests for frame parsing and envelope canonicalization.

use crate::{parse_agent_frame, SecureEnvelope};
use proptest::prelude::*;

proptest! {
    /// Any JSON object without a string `type` field must be rejected as
    /// MessageMissingType, never panic or misparse.
    #[test]
    fn objects_without_type_are_rejected(keys in proptest::collection::vec("[a-z]{1,8}", 0..5)) {
        let mut obj = serde_json::Map::new();
        for (i, k) in keys.iter().enumerate() {
            if k == "type" {
                continue;
            }
            obj.insert(k.clone(), serde_json::Value::from(i as u64));
        }
        let text = serde_json::to_string(&serde_json::Value::Object(obj)).unwrap();
        prop_assert_eq!(parse_agent_frame(&text).unwrap_err(), fd_core::Fault::MessageMissingType);
    }

    /// The canonical signing input is identical before serialization and
    /// after a wire round trip, for arbitrary payload content.
    #[test]
    fn signing_input_survives_round_trip(
        data in "[ -~]{0,64}",
        nonce in "[a-zA-Z0-9_-]{1,32}",
        timestamp in 0u64..=u64::MAX / 2,
    ) {
        let payload = serde_json::to_string(&serde_json::json!({ "data": data })).unwrap();
        let env = SecureEnvelope::unsigned(
            "terminal_input", "ses-p", "mch-p", payload, nonce, timestamp,
        ).unwrap();

        let wire = serde_json::to_string(&env).unwrap();
        let back: SecureEnvelope = serde_json::from_str(&wire).unwrap();
        prop_assert_eq!(back.signing_input(), env.signing_input());
    }

    /// The signing input embeds the timestamp as a bare JSON number.
    #[test]
    fn signing_input_ends_with_timestamp(timestamp in 0u64..=u64::MAX / 2) {
        let env = SecureEnvelope::unsigned(
            "execute_command", "s", "m", "{}".to_string(), "n", timestamp,
        ).unwrap();
        let expected = format!("\"timestamp\":{}}}", timestamp);
        prop_assert!(env.signing_input().ends_with(&expected));
    }
}
