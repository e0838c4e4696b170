// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_support::MemorySink;
use fd_core::FakeClock;
use serde_json::json;
use std::time::Duration;

struct Harness {
    engine: SecurityEngine<FakeClock>,
    clock: FakeClock,
    state: Arc<Mutex<MaterializedState>>,
}

fn harness() -> Harness {
    let state = Arc::new(Mutex::new(MaterializedState::default()));
    let sink = Arc::new(MemorySink::new(Arc::clone(&state)));
    let clock = FakeClock::new();
    let engine = SecurityEngine::new(Arc::clone(&state), sink, clock.clone());
    Harness { engine, clock, state }
}

fn failed_auth(ip: &str) -> AgentSecurityEvent {
    AgentSecurityEvent {
        kind: "failed_auth".to_string(),
        message: "failed ssh auth".to_string(),
        data: json!({ "source_ip": ip }),
    }
}

fn integrity(path: &str) -> AgentSecurityEvent {
    AgentSecurityEvent {
        kind: "integrity".to_string(),
        message: format!("{} changed", path),
        data: json!({ "path": path }),
    }
}

fn machine() -> MachineId {
    MachineId::from_string("mch-1")
}

fn open_rows(state: &Arc<Mutex<MaterializedState>>) -> usize {
    state
        .lock()
        .security_events
        .values()
        .filter(|e| !e.status.is_resolved())
        .count()
}

#[test]
fn duplicate_failed_auth_dedups_to_one_row() {
    let h = harness();

    let first = h.engine.ingest(&machine(), &failed_auth("10.0.0.5"), IngestPath::Direct).unwrap();
    h.clock.advance(Duration::from_secs(60));
    let second = h.engine.ingest(&machine(), &failed_auth("10.0.0.5"), IngestPath::Direct).unwrap();

    let first = first.unwrap();
    let second = second.unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(h.state.lock().security_events.len(), 1);
    assert_eq!(second.status, SecurityEventStatus::Open);
    assert!(second.updated_at_ms > first.updated_at_ms);
}

#[test]
fn different_source_ips_are_different_rows() {
    let h = harness();
    h.engine.ingest(&machine(), &failed_auth("10.0.0.5"), IngestPath::Direct).unwrap();
    h.engine.ingest(&machine(), &failed_auth("10.0.0.6"), IngestPath::Direct).unwrap();
    assert_eq!(h.state.lock().security_events.len(), 2);
}

#[test]
fn at_most_one_non_resolved_row_per_fingerprint() {
    let h = harness();
    for _ in 0..5 {
        h.clock.advance(Duration::from_secs(120));
        h.engine.ingest(&machine(), &failed_auth("10.0.0.5"), IngestPath::Direct).unwrap();
    }
    assert_eq!(open_rows(&h.state), 1);
}

#[test]
fn resolved_status_survives_rearrival() {
    let h = harness();
    let row = h
        .engine
        .ingest(&machine(), &failed_auth("10.0.0.5"), IngestPath::Direct)
        .unwrap()
        .unwrap();

    h.engine.resolve_all(&machine()).unwrap();
    h.clock.advance(Duration::from_secs(60));

    let after = h
        .engine
        .ingest(&machine(), &failed_auth("10.0.0.5"), IngestPath::Direct)
        .unwrap()
        .unwrap();

    // Updated in place, status stays resolved.
    assert_eq!(after.id, row.id);
    assert_eq!(after.status, SecurityEventStatus::Resolved);
    assert_eq!(open_rows(&h.state), 0);
}

#[test]
fn integrity_cooldown_suppresses_inside_window() {
    let h = harness();
    assert!(h
        .engine
        .ingest(&machine(), &integrity("/etc/passwd"), IngestPath::Direct)
        .unwrap()
        .is_some());

    h.clock.advance(Duration::from_secs(29 * 60));
    assert!(h
        .engine
        .ingest(&machine(), &integrity("/etc/passwd"), IngestPath::Direct)
        .unwrap()
        .is_none());

    h.clock.advance(Duration::from_secs(2 * 60));
    assert!(h
        .engine
        .ingest(&machine(), &integrity("/etc/passwd"), IngestPath::Direct)
        .unwrap()
        .is_some());
}

#[test]
fn scan_path_uses_the_shorter_cooldown() {
    let h = harness();
    h.engine.ingest(&machine(), &integrity("/etc/passwd"), IngestPath::Scan).unwrap();

    h.clock.advance(Duration::from_secs(16 * 60));
    // Past the 15-minute scan window but inside the 30-minute direct one.
    assert!(h
        .engine
        .ingest(&machine(), &integrity("/etc/passwd"), IngestPath::Scan)
        .unwrap()
        .is_some());
}

#[test]
fn cooldown_does_not_apply_to_resolved_rows() {
    let h = harness();
    h.engine.ingest(&machine(), &integrity("/etc/passwd"), IngestPath::Direct).unwrap();
    h.engine.resolve_all(&machine()).unwrap();

    h.clock.advance(Duration::from_secs(60));
    // Re-arrival updates the resolved row in place instead of suppressing.
    let updated = h
        .engine
        .ingest(&machine(), &integrity("/etc/passwd"), IngestPath::Direct)
        .unwrap()
        .unwrap();
    assert_eq!(updated.status, SecurityEventStatus::Resolved);
}

#[test]
fn deny_listed_paths_are_dropped() {
    let h = harness();
    for path in [
        "/var/log/syslog",
        "var/log/auth.log",
        "/var/lib/docker/containers/abc/config.json",
        "/var/cache/apt/archives/x.deb",
        "/var/lib/apt/lists/x",
        "/var/lib/dpkg/status",
        "/var/tmp/junk",
        "/root/.pm2/logs/out.log",
    ] {
        assert!(
            h.engine.ingest(&machine(), &integrity(path), IngestPath::Direct).unwrap().is_none(),
            "{path} should be deny-listed"
        );
    }
    assert!(h.state.lock().security_events.is_empty());
}

#[test]
fn deny_list_does_not_swallow_siblings() {
    let h = harness();
    // var/www is not var/ (deny entries are whole path components).
    assert!(h
        .engine
        .ingest(&machine(), &integrity("/var/www/html/index.php"), IngestPath::Direct)
        .unwrap()
        .is_some());
}

#[test]
fn integrity_severity_classification() {
    let h = harness();
    let cases = [
        ("/etc/passwd", Severity::High),
        ("/root/.ssh/authorized_keys", Severity::High),
        ("/usr/bin/sudo", Severity::High),
        ("/sbin/init", Severity::High),
        ("/boot/vmlinuz", Severity::High),
        ("/lib/x86_64/libc.so", Severity::High),
        ("/opt/app/config.yml", Severity::Medium),
        ("/srv/data/app.db", Severity::Medium),
        ("/var/www/html/index.php", Severity::Medium),
        ("/home/deploy/bin/run.sh", Severity::Medium),
        ("/home/deploy/notes.txt", Severity::Low),
        ("/tmp/scratch", Severity::Low),
    ];
    for (path, expected) in cases {
        let row = h
            .engine
            .ingest(&machine(), &integrity(path), IngestPath::Direct)
            .unwrap()
            .unwrap();
        assert_eq!(row.severity, expected, "{path}");
    }
}

#[test]
fn resolve_ids_counts_affected_rows() {
    let h = harness();
    let a = h.engine.ingest(&machine(), &failed_auth("10.0.0.1"), IngestPath::Direct).unwrap().unwrap();
    h.engine.ingest(&machine(), &failed_auth("10.0.0.2"), IngestPath::Direct).unwrap();

    assert_eq!(h.engine.resolve_ids(&machine(), vec![a.id]).unwrap(), 1);
    assert_eq!(open_rows(&h.state), 1);

    // Resolving again is a no-op.
    assert_eq!(h.engine.resolve_ids(&machine(), vec![a.id]).unwrap(), 0);
}

#[test]
fn resolve_all_returns_zero_when_nothing_open() {
    let h = harness();
    assert_eq!(h.engine.resolve_all(&machine()).unwrap(), 0);
}

#[test]
fn vulnerability_summary_updates_one_row_in_place() {
    let h = harness();
    let first = h
        .engine
        .record_vulnerability_summary(
            &machine(),
            VulnerabilitySummary { critical: 1, total: 3, high: 2, ..Default::default() },
        )
        .unwrap()
        .unwrap();
    assert_eq!(first.severity, Severity::Critical);

    h.clock.advance(Duration::from_secs(60));
    let second = h
        .engine
        .record_vulnerability_summary(
            &machine(),
            VulnerabilitySummary { high: 1, total: 1, ..Default::default() },
        )
        .unwrap()
        .unwrap();

    assert_eq!(second.id, first.id);
    assert_eq!(second.severity, Severity::High);
    assert_eq!(h.state.lock().security_events.len(), 1);
}
