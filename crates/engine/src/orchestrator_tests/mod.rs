// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_support::{MemorySink, MockDispatch};
use fd_core::test_support::{hex_secret, online_machine};
use fd_core::{ExecutionStatus, FakeClock, JobMode, JobStatus, MachineStatus, TargetSpec};
use fd_storage::MaterializedState;
use fd_wire::{CreateJobRequest, DryRunReport};
use std::time::Duration;

struct Harness {
    orchestrator: Arc<Orchestrator<FakeClock>>,
    dispatch: Arc<MockDispatch>,
    sink: Arc<MemorySink>,
    state: Arc<Mutex<MaterializedState>>,
    clock: FakeClock,
}

const SERVER_SECRET: &str = "server-secret-for-tests";

fn harness(machine_count: usize) -> Harness {
    let state = Arc::new(Mutex::new(MaterializedState::default()));
    let secrets = SecretManager::from_secret(SERVER_SECRET);

    {
        let mut guard = state.lock();
        for i in 0..machine_count {
            let mut machine = online_machine(&format!("mch-{}", i), &format!("host-{}", i));
            let normalized = hex_secret('a');
            machine.secret_hash = SecretManager::hash_secret(&normalized);
            machine.secret_enc = secrets.encrypt_secret(&normalized).unwrap();
            guard.apply_event(&Event::MachineRegistered { machine });
        }
    }

    let sink = Arc::new(MemorySink::new(Arc::clone(&state)));
    let dispatch = Arc::new(MockDispatch::new());
    let clock = FakeClock::new();
    let sessions = SessionService::new(secrets.clone(), 3_600_000);

    let orchestrator = Orchestrator::new(
        Arc::clone(&state),
        Arc::clone(&sink) as Arc<dyn crate::EventSink>,
        Arc::clone(&dispatch) as Arc<dyn crate::Dispatch>,
        secrets,
        sessions,
        clock.clone(),
        OrchestratorConfig { poll_interval_ms: 10, ..Default::default() },
    );

    Harness { orchestrator, dispatch, sink, state, clock }
}

fn request(command: &str, mode: JobMode, targets: &[&str]) -> CreateJobRequest {
    CreateJobRequest {
        command: command.to_string(),
        mode,
        target: TargetSpec::Adhoc { ids: targets.iter().map(|t| (*t).into()).collect() },
        strategy: fd_core::JobStrategy::default(),
        dry_run: false,
        reauth_token: None,
    }
}

fn job_status(h: &Harness, job_id: &JobId) -> JobStatus {
    h.state.lock().get_job(job_id.as_str()).map(|j| j.status).unwrap_or(JobStatus::Pending)
}

fn status_counts(h: &Harness, job_id: &JobId) -> (u32, u32, u32) {
    let state = h.state.lock();
    let mut success = 0;
    let mut failed = 0;
    let mut aborted = 0;
    for execution in state.executions_for_job(job_id.as_str()) {
        match execution.status {
            ExecutionStatus::Success => success += 1,
            ExecutionStatus::Failed => failed += 1,
            ExecutionStatus::Aborted => aborted += 1,
            _ => {}
        }
    }
    (success, failed, aborted)
}

/// Poll a condition while letting the runner make progress.
async fn drive_until(mut cond: impl FnMut() -> bool, what: &str) {
    for _ in 0..2_000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Pull a sent execute envelope's work ID.
fn work_id(envelope: &fd_wire::SecureEnvelope) -> String {
    let payload: fd_wire::ExecuteCommandPayload = envelope.payload_as().unwrap();
    payload.command_id
}

// --- target resolution and dry run ---

#[tokio::test]
async fn dry_run_partitions_online_and_offline() {
    let h = harness(3);
    h.state.lock().apply_event(&Event::MachineStatusChanged {
        id: "mch-2".into(),
        status: MachineStatus::Offline,
        at_ms: 1,
    });

    let report = h
        .orchestrator
        .dry_run(&request("uptime", JobMode::Parallel, &["mch-0", "mch-1", "mch-2"]))
        .unwrap();

    assert_eq!(report, DryRunReport {
        total: 3,
        offline: 1,
        targets: vec!["mch-0".into(), "mch-1".into(), "mch-2".into()],
    });
    // Dry runs never dispatch and never audit.
    assert_eq!(h.dispatch.sent_count(), 0);
    assert!(h.sink.event_names().iter().all(|n| *n != "audit:recorded"));
}

#[tokio::test]
async fn unknown_adhoc_target_is_rejected() {
    let h = harness(1);
    let err = h
        .orchestrator
        .create_job(&request("uptime", JobMode::Parallel, &["mch-missing"]), "usr-1".into())
        .unwrap_err();
    assert_eq!(err, Fault::MachineNotFound);
}

#[tokio::test]
async fn duplicate_targets_are_deduplicated() {
    let h = harness(1);
    let report = h
        .orchestrator
        .dry_run(&request("uptime", JobMode::Parallel, &["mch-0", "mch-0"]))
        .unwrap();
    assert_eq!(report.total, 1);
}

// --- parallel strategy ---

#[tokio::test(start_paused = true)]
async fn parallel_job_succeeds_and_respects_concurrency() {
    let h = harness(5);
    let mut req = request("uptime", JobMode::Parallel, &["mch-0", "mch-1", "mch-2", "mch-3", "mch-4"]);
    req.strategy.concurrency = 2;

    let job = h.orchestrator.create_job(&req, "usr-1".into()).unwrap();
    assert_eq!(job.total_targets, 5);

    let mut max_in_flight = 0;
    let mut completed = 0;
    while completed < 5 {
        let sent = h.dispatch.take_sent();
        max_in_flight = max_in_flight.max(sent.len());
        assert!(sent.len() <= 2, "concurrency exceeded");
        for (_, envelope) in sent {
            let id = work_id(&envelope);
            h.orchestrator
                .handle_execution_completed(&id.as_str().into(), 0)
                .unwrap();
            completed += 1;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    drive_until(|| job_status(&h, &job.id).is_terminal(), "job terminal").await;
    assert_eq!(job_status(&h, &job.id), JobStatus::Success);
    assert_eq!(status_counts(&h, &job.id), (5, 0, 0));
    assert!(max_in_flight >= 1);
}

#[tokio::test(start_paused = true)]
async fn parallel_failure_threshold_aborts_pending_and_fails_the_job() {
    let h = harness(10);
    let targets: Vec<String> = (0..10).map(|i| format!("mch-{}", i)).collect();
    let target_refs: Vec<&str> = targets.iter().map(String::as_str).collect();
    let mut req = request("uptime", JobMode::Parallel, &target_refs);
    req.strategy.concurrency = 3;
    req.strategy.stop_on_failure_percent = 50;

    let job = h.orchestrator.create_job(&req, "usr-1".into()).unwrap();

    // Fail every dispatched execution until the threshold trips.
    tokio::spawn({
        let orchestrator = Arc::clone(&h.orchestrator);
        let dispatch = Arc::clone(&h.dispatch);
        async move {
            loop {
                for (_, envelope) in dispatch.take_sent() {
                    let id = work_id(&envelope);
                    let _ = orchestrator.handle_execution_completed(&id.as_str().into(), 1);
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        }
    });

    drive_until(|| job_status(&h, &job.id).is_terminal(), "job terminal").await;

    assert_eq!(job_status(&h, &job.id), JobStatus::Failed);
    let (success, failed, aborted) = status_counts(&h, &job.id);
    assert_eq!(success, 0);
    assert_eq!(failed, 6);
    assert_eq!(aborted, 4);
}

// --- rolling strategy ---

#[tokio::test(start_paused = true)]
async fn rolling_job_runs_in_waves_with_sleeps_between() {
    let h = harness(6);
    let targets: Vec<String> = (0..6).map(|i| format!("mch-{}", i)).collect();
    let target_refs: Vec<&str> = targets.iter().map(String::as_str).collect();
    let mut req = request("apt upgrade -y", JobMode::Rolling, &target_refs);
    req.strategy.batch_size = 2;
    req.strategy.wait_seconds = 1;
    req.strategy.stop_on_failure_percent = 100;

    let started = tokio::time::Instant::now();
    let job = h.orchestrator.create_job(&req, "usr-1".into()).unwrap();

    let mut waves = 0;
    let mut completed = 0;
    while completed < 6 {
        drive_until(|| h.dispatch.sent_count() == 2, "next wave dispatched").await;
        let sent = h.dispatch.take_sent();
        assert_eq!(sent.len(), 2, "waves are exactly batch_size");
        waves += 1;
        for (_, envelope) in sent {
            let id = work_id(&envelope);
            h.orchestrator
                .handle_execution_completed(&id.as_str().into(), 0)
                .unwrap();
            completed += 1;
        }
    }

    drive_until(|| job_status(&h, &job.id).is_terminal(), "job terminal").await;

    assert_eq!(waves, 3);
    assert_eq!(job_status(&h, &job.id), JobStatus::Success);
    assert_eq!(status_counts(&h, &job.id), (6, 0, 0));
    // Two inter-wave pauses of wait_seconds each.
    assert!(started.elapsed() >= Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn rolling_threshold_stops_further_batches() {
    let h = harness(6);
    let targets: Vec<String> = (0..6).map(|i| format!("mch-{}", i)).collect();
    let target_refs: Vec<&str> = targets.iter().map(String::as_str).collect();
    let mut req = request("uptime", JobMode::Rolling, &target_refs);
    req.strategy.batch_size = 2;
    req.strategy.wait_seconds = 0;
    req.strategy.stop_on_failure_percent = 30;

    let job = h.orchestrator.create_job(&req, "usr-1".into()).unwrap();

    // Fail the first wave: 2/6 = 33% ≥ 30%.
    drive_until(|| h.dispatch.sent_count() == 2, "first wave").await;
    for (_, envelope) in h.dispatch.take_sent() {
        let id = work_id(&envelope);
        h.orchestrator.handle_execution_completed(&id.as_str().into(), 1).unwrap();
    }

    drive_until(|| job_status(&h, &job.id).is_terminal(), "job terminal").await;

    assert_eq!(job_status(&h, &job.id), JobStatus::Failed);
    let (_, failed, aborted) = status_counts(&h, &job.id);
    assert_eq!(failed, 2);
    assert_eq!(aborted, 4);
    // No further waves were dispatched.
    assert_eq!(h.dispatch.sent_count(), 0);
}

// --- kill switch ---

#[tokio::test(start_paused = true)]
async fn abort_job_aborts_pending_and_cancels_running() {
    let h = harness(4);
    let mut req = request("sleep 600", JobMode::Parallel, &["mch-0", "mch-1", "mch-2", "mch-3"]);
    req.strategy.concurrency = 2;

    let job = h.orchestrator.create_job(&req, "usr-1".into()).unwrap();
    drive_until(|| h.dispatch.sent_count() == 2, "first two dispatched").await;
    let running = h.dispatch.take_sent();

    h.orchestrator.abort_job(&job.id, Some("usr-1".into())).unwrap();

    // Best-effort cancel envelopes go to the running pair.
    drive_until(|| h.dispatch.sent_count() == 2, "cancel envelopes").await;
    for (_, envelope) in h.dispatch.take_sent() {
        assert_eq!(envelope.msg_type, "cancel_command");
    }

    // Agents ack by completing; acks while aborting count as aborted.
    for (_, envelope) in running {
        let id = work_id(&envelope);
        h.orchestrator.handle_execution_completed(&id.as_str().into(), 143).unwrap();
    }

    drive_until(|| job_status(&h, &job.id).is_terminal(), "job terminal").await;

    assert_eq!(job_status(&h, &job.id), JobStatus::Aborted);
    let (success, failed, aborted) = status_counts(&h, &job.id);
    assert_eq!((success, failed), (0, 0));
    assert_eq!(aborted, 4);

    // BULK_JOB_ABORTED was audited.
    let audited = h.sink.events.lock().iter().any(|e| {
        matches!(e, Event::AuditRecorded { entry }
            if entry.action == fd_core::AuditAction::BulkJobAborted)
    });
    assert!(audited);
}

#[tokio::test]
async fn abort_unknown_job_is_not_found() {
    let h = harness(1);
    assert_eq!(
        h.orchestrator.abort_job(&JobId::from_string("job-missing"), None),
        Err(Fault::JobNotFound)
    );
}

// --- dispatch failures and disconnects ---

#[tokio::test(start_paused = true)]
async fn offline_machine_fails_the_execution() {
    let h = harness(2);
    h.dispatch.set_offline(&"mch-1".into());

    let job = h
        .orchestrator
        .create_job(&request("uptime", JobMode::Parallel, &["mch-0", "mch-1"]), "usr-1".into())
        .unwrap();

    drive_until(|| h.dispatch.sent_count() == 1, "online dispatch").await;
    for (_, envelope) in h.dispatch.take_sent() {
        let id = work_id(&envelope);
        h.orchestrator.handle_execution_completed(&id.as_str().into(), 0).unwrap();
    }

    drive_until(|| job_status(&h, &job.id).is_terminal(), "job terminal").await;

    assert_eq!(job_status(&h, &job.id), JobStatus::Failed);
    let state = h.state.lock();
    let failed = state
        .executions_for_job(job.id.as_str())
        .into_iter()
        .find(|e| e.status == ExecutionStatus::Failed)
        .cloned()
        .unwrap();
    assert_eq!(failed.machine_id, "mch-1");
    assert_eq!(failed.error.as_deref(), Some("agent disconnected"));
}

#[tokio::test(start_paused = true)]
async fn disconnect_fails_running_work_unless_reboot_class() {
    let h = harness(2);
    let job = h
        .orchestrator
        .create_job(&request("uptime", JobMode::Parallel, &["mch-0"]), "usr-1".into())
        .unwrap();
    drive_until(|| h.dispatch.sent_count() == 1, "dispatched").await;

    h.orchestrator.handle_agent_disconnect(&"mch-0".into()).unwrap();
    drive_until(|| job_status(&h, &job.id).is_terminal(), "job terminal").await;

    assert_eq!(job_status(&h, &job.id), JobStatus::Failed);
    let (_, failed, _) = status_counts(&h, &job.id);
    assert_eq!(failed, 1);
}

#[tokio::test(start_paused = true)]
async fn reboot_disconnect_then_reconnect_is_success() {
    let h = harness(1);
    let job = h
        .orchestrator
        .create_job(&request("reboot", JobMode::Parallel, &["mch-0"]), "usr-1".into())
        .unwrap();
    drive_until(|| h.dispatch.sent_count() == 1, "dispatched").await;

    // Socket drops right after dispatch: expected, not a failure.
    h.orchestrator.handle_agent_disconnect(&"mch-0".into()).unwrap();
    assert!(!job_status(&h, &job.id).is_terminal());

    // Agent comes back inside the 5 minute window.
    h.clock.advance(Duration::from_secs(60));
    h.orchestrator.handle_agent_reconnect(&"mch-0".into()).unwrap();

    drive_until(|| job_status(&h, &job.id).is_terminal(), "job terminal").await;
    assert_eq!(job_status(&h, &job.id), JobStatus::Success);

    // The ambiguity is surfaced in the audit details.
    let surfaced = h.sink.events.lock().iter().any(|e| {
        matches!(e, Event::AuditRecorded { entry }
            if entry.action == fd_core::AuditAction::ExpectedDisconnectAssumedSuccess
                && entry.details["assumed_success_after_reconnect"] == true)
    });
    assert!(surfaced);
}

#[tokio::test(start_paused = true)]
async fn reboot_without_reconnect_fails_after_the_window() {
    let h = harness(1);
    let job = h
        .orchestrator
        .create_job(&request("reboot", JobMode::Parallel, &["mch-0"]), "usr-1".into())
        .unwrap();
    drive_until(|| h.dispatch.sent_count() == 1, "dispatched").await;

    h.orchestrator.handle_agent_disconnect(&"mch-0".into()).unwrap();
    h.clock.advance(Duration::from_secs(6 * 60));

    drive_until(|| job_status(&h, &job.id).is_terminal(), "job terminal").await;
    assert_eq!(job_status(&h, &job.id), JobStatus::Failed);
}

// --- output and completion bookkeeping ---

#[tokio::test(start_paused = true)]
async fn output_is_recorded_until_terminal_then_ignored() {
    let h = harness(1);
    let job = h
        .orchestrator
        .create_job(&request("uptime", JobMode::Parallel, &["mch-0"]), "usr-1".into())
        .unwrap();
    drive_until(|| h.dispatch.sent_count() == 1, "dispatched").await;

    let sent = h.dispatch.take_sent();
    let id: fd_core::ExecutionId = work_id(&sent[0].1).as_str().into();

    h.orchestrator.handle_execution_output(&id, "up 3 days\n").unwrap();
    h.orchestrator.handle_execution_completed(&id, 0).unwrap();
    // Late frames after the terminal state are dropped, but the late
    // completion above already released bookkeeping.
    h.orchestrator.handle_execution_output(&id, "late\n").unwrap();

    drive_until(|| job_status(&h, &job.id).is_terminal(), "job terminal").await;

    let state = h.state.lock();
    let execution = state.executions.get(id.as_str()).unwrap();
    assert_eq!(execution.output, "up 3 days\n");
    assert_eq!(execution.status, ExecutionStatus::Success);
}

#[tokio::test(start_paused = true)]
async fn envelopes_are_signed_with_the_machine_secret() {
    let h = harness(1);
    h.orchestrator
        .create_job(&request("uptime", JobMode::Parallel, &["mch-0"]), "usr-1".into())
        .unwrap();
    drive_until(|| h.dispatch.sent_count() == 1, "dispatched").await;

    let sent = h.dispatch.take_sent();
    let envelope = &sent[0].1;
    assert_eq!(envelope.msg_type, "execute_command");
    assert!(fd_secure::verify_hmac(envelope, &hex_secret('a')));

    // The system session was persisted with only execute_command.
    let state = h.state.lock();
    let session = state.sessions.get(envelope.session_id.as_str()).unwrap();
    assert_eq!(session.capabilities, vec![fd_core::Capability::ExecuteCommand]);
    assert_eq!(session.user_id, SYSTEM_USER);
}

// --- single command path ---

#[tokio::test(start_paused = true)]
async fn single_command_round_trip() {
    let h = harness(1);
    let record = h.orchestrator.run_command(&"mch-0".into(), "df -h").await.unwrap();
    assert_eq!(record.status, fd_core::CommandStatus::Running);
    assert_eq!(h.dispatch.sent_count(), 1);

    h.orchestrator.handle_command_output(&record.id, "Filesystem\n").unwrap();
    h.orchestrator.handle_command_completed(&record.id, 0).unwrap();

    let state = h.state.lock();
    let stored = state.commands.get(record.id.as_str()).unwrap();
    assert_eq!(stored.status, fd_core::CommandStatus::Success);
    assert_eq!(stored.exit_code, Some(0));
    assert_eq!(stored.output, "Filesystem\n");
}

#[tokio::test(start_paused = true)]
async fn single_command_against_unknown_machine() {
    let h = harness(1);
    let err = h.orchestrator.run_command(&"mch-missing".into(), "df -h").await.unwrap_err();
    assert_eq!(err, Fault::MachineNotFound);
}
