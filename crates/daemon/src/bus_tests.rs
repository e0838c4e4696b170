// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::test_support::{attach_web, drain_frames, seed_machine, seed_user, test_ctx};
use fd_core::test_support::online_machine;
use fd_core::{Clock, Event, MachineStatus, MetricSnapshot, Role};
use fd_engine::EventSink;
use fd_storage::Wal;
use tempfile::tempdir;

#[tokio::test]
async fn emit_applies_state_and_cache_synchronously() {
    let dir = tempdir().unwrap();
    let ctx = test_ctx(dir.path());

    ctx.bus
        .emit(Event::MachineRegistered { machine: online_machine("mch-a", "host-a") })
        .unwrap();

    assert!(ctx.state.lock().get_machine("mch-a").is_some());
    assert!(ctx.cache.lock().get("mch-a").is_some());

    ctx.bus
        .emit(Event::MetricRecorded {
            machine_id: "mch-a".into(),
            metric: MetricSnapshot { cpu_percent: 42.0, recorded_at_ms: 1, ..Default::default() },
        })
        .unwrap();
    let cached = ctx.cache.lock().get("mch-a").unwrap().latest_metric.clone().unwrap();
    assert_eq!(cached.cpu_percent, 42.0);
}

#[tokio::test]
async fn emitted_events_survive_a_wal_reopen() {
    let dir = tempdir().unwrap();
    let wal_path = {
        let ctx = test_ctx(dir.path());
        seed_machine(&ctx, "mch-a", "host-a");
        ctx.bus
            .emit(Event::MachineStatusChanged {
                id: "mch-a".into(),
                status: MachineStatus::Offline,
                at_ms: 10,
            })
            .unwrap();
        ctx.bus.flush();
        ctx.config.wal_path()
    };

    let wal = Wal::open(&wal_path, 0).unwrap();
    let entries = wal.entries_after(0);
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].event.name(), "machine:registered");
    assert_eq!(entries[1].event.name(), "machine:status_changed");
}

#[tokio::test]
async fn events_fan_out_as_web_frames() {
    let dir = tempdir().unwrap();
    let ctx = test_ctx(dir.path());
    let user = seed_user(&ctx, "usr-1", Role::Admin);
    let mut web = attach_web(&ctx, "client-1", &user, Role::Admin);

    seed_machine(&ctx, "mch-a", "host-a");
    ctx.bus
        .emit(Event::MachineStatusChanged {
            id: "mch-a".into(),
            status: MachineStatus::Offline,
            at_ms: 10,
        })
        .unwrap();

    let frames = drain_frames(&mut web);
    // seed_user emits no frame; registration and the flip do.
    assert_eq!(frames.len(), 2);
    assert!(frames[0].contains("new_machine"));
    assert!(frames[1].contains("machine_status_changed"));
    assert!(frames[1].contains("offline"));
}

#[tokio::test]
async fn machine_refreshed_does_not_announce_new_machine() {
    let dir = tempdir().unwrap();
    let ctx = test_ctx(dir.path());
    let user = seed_user(&ctx, "usr-1", Role::Admin);
    seed_machine(&ctx, "mch-a", "host-a");

    let mut web = attach_web(&ctx, "client-1", &user, Role::Admin);
    ctx.bus
        .emit(Event::MachineRefreshed { machine: online_machine("mch-a", "host-a") })
        .unwrap();

    assert!(drain_frames(&mut web).is_empty());
}

#[tokio::test]
async fn audit_entries_broadcast_and_never_fail() {
    let dir = tempdir().unwrap();
    let ctx = test_ctx(dir.path());
    let user = seed_user(&ctx, "usr-1", Role::Admin);
    let mut web = attach_web(&ctx, "client-1", &user, Role::Admin);

    ctx.bus.audit(fd_core::AuditEntry::new(
        fd_core::AuditAction::TerminalSessionOpened,
        ctx.clock.epoch_ms(),
    ));

    assert_eq!(ctx.state.lock().audit_log.len(), 1);
    let frames = drain_frames(&mut web);
    assert_eq!(frames.len(), 1);
    assert!(frames[0].contains("audit_log"));
}
