// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use fd_core::{Fault, JobMode};

#[test]
fn create_job_request_minimal_body() {
    let req: CreateJobRequest = serde_json::from_str(
        r#"{"command":"uptime","mode":"parallel","target":{"mode":"adhoc","ids":["mch-a"]}}"#,
    )
    .unwrap();
    assert_eq!(req.mode, JobMode::Parallel);
    assert!(!req.dry_run);
    assert_eq!(req.strategy.stop_on_failure_percent, 100);
    assert!(req.reauth_token.is_none());
}

#[test]
fn api_fault_carries_stable_kind() {
    let fault = Fault::JobNotFound;
    let api: ApiFault = (&fault).into();
    assert_eq!(api.kind, "JobNotFound");
    let json = serde_json::to_value(&api).unwrap();
    assert_eq!(json["kind"], "JobNotFound");
}

#[test]
fn cve_status_trigger_shape() {
    let view = CveStatusView {
        status: "running".into(),
        accepted: Some(true),
        cve_count: 10,
        ..Default::default()
    };
    let json = serde_json::to_value(&view).unwrap();
    assert_eq!(json["status"], "running");
    assert_eq!(json["accepted"], true);
    assert_eq!(json["cveCount"], 10);
}
