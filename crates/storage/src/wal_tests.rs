// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use fd_core::Event;
use std::io::Write;
use tempfile::tempdir;

fn test_event(id: &str) -> Event {
    Event::MachineHeartbeat { id: id.into(), at_ms: 1 }
}

#[test]
fn open_creates_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("events.wal");

    let wal = Wal::open(&path, 0).unwrap();

    assert!(path.exists());
    assert_eq!(wal.write_seq(), 0);
    assert_eq!(wal.processed_seq(), 0);
}

#[test]
fn append_assigns_sequential_seqs() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("events.wal");

    let mut wal = Wal::open(&path, 0).unwrap();

    assert_eq!(wal.append(&test_event("mch-1")).unwrap(), 1);
    assert_eq!(wal.append(&test_event("mch-2")).unwrap(), 2);

    wal.flush().unwrap();

    let metadata = std::fs::metadata(&path).unwrap();
    assert!(metadata.len() > 0);
}

#[test]
fn next_unprocessed_advances_cursor() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("events.wal");

    let mut wal = Wal::open(&path, 0).unwrap();
    wal.append(&test_event("mch-1")).unwrap();
    wal.append(&test_event("mch-2")).unwrap();

    let entry1 = wal.next_unprocessed().unwrap();
    assert_eq!(entry1.seq, 1);
    assert!(matches!(entry1.event, Event::MachineHeartbeat { ref id, .. } if id == "mch-1"));

    let entry2 = wal.next_unprocessed().unwrap();
    assert_eq!(entry2.seq, 2);

    assert!(wal.next_unprocessed().is_none());
}

#[test]
fn mark_processed_is_monotonic() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("events.wal");

    let mut wal = Wal::open(&path, 0).unwrap();
    wal.append(&test_event("mch-1")).unwrap();
    wal.append(&test_event("mch-2")).unwrap();

    wal.mark_processed(2);
    assert_eq!(wal.processed_seq(), 2);

    wal.mark_processed(1);
    assert_eq!(wal.processed_seq(), 2);
}

#[test]
fn reopen_with_processed_seq_skips_applied_entries() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("events.wal");

    {
        let mut wal = Wal::open(&path, 0).unwrap();
        wal.append(&test_event("mch-1")).unwrap();
        wal.append(&test_event("mch-2")).unwrap();
        wal.append(&test_event("mch-3")).unwrap();
        wal.flush().unwrap();
    }

    // Reopen with processed_seq=2 (recovery from snapshot)
    let mut wal = Wal::open(&path, 2).unwrap();

    let entry = wal.next_unprocessed().unwrap();
    assert_eq!(entry.seq, 3);
    assert!(matches!(entry.event, Event::MachineHeartbeat { ref id, .. } if id == "mch-3"));

    assert!(wal.next_unprocessed().is_none());
}

#[test]
fn entries_after_filters_by_seq() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("events.wal");

    let mut wal = Wal::open(&path, 0).unwrap();
    wal.append(&test_event("mch-1")).unwrap();
    wal.append(&test_event("mch-2")).unwrap();
    wal.append(&test_event("mch-3")).unwrap();

    let entries = wal.entries_after(1);
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].seq, 2);
    assert_eq!(entries[1].seq, 3);
}

#[test]
fn truncate_before_drops_the_prefix() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("events.wal");

    let mut wal = Wal::open(&path, 0).unwrap();
    wal.append(&test_event("mch-1")).unwrap();
    wal.append(&test_event("mch-2")).unwrap();
    wal.append(&test_event("mch-3")).unwrap();

    wal.truncate_before(2).unwrap();

    let entries = wal.entries_after(0);
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].seq, 2);
    assert_eq!(entries[1].seq, 3);

    // Seq numbering continues after truncation.
    assert_eq!(wal.append(&test_event("mch-4")).unwrap(), 4);
}

#[test]
fn truncation_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("events.wal");

    {
        let mut wal = Wal::open(&path, 0).unwrap();
        wal.append(&test_event("mch-1")).unwrap();
        wal.append(&test_event("mch-2")).unwrap();
        wal.truncate_before(2).unwrap();
    }

    let wal = Wal::open(&path, 0).unwrap();
    let entries = wal.entries_after(0);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].seq, 2);
}

#[test]
fn needs_flush_after_threshold() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("events.wal");

    let mut wal = Wal::open(&path, 0).unwrap();
    assert!(!wal.needs_flush());

    for i in 0..101 {
        wal.append(&test_event(&format!("mch-{}", i))).unwrap();
    }

    assert!(wal.needs_flush());
    wal.flush().unwrap();
    assert!(!wal.needs_flush());
}

#[test]
fn open_corrupt_wal_creates_bak_and_preserves_valid_entries() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("events.wal");

    {
        let mut wal = Wal::open(&path, 0).unwrap();
        wal.append(&test_event("mch-1")).unwrap();
        wal.append(&test_event("mch-2")).unwrap();
        wal.flush().unwrap();
    }
    {
        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"not-valid-json\n").unwrap();
    }

    let wal = Wal::open(&path, 0).unwrap();

    assert_eq!(wal.write_seq(), 2);
    assert!(path.with_extension("bak").exists());

    let entries = wal.entries_after(0);
    assert_eq!(entries.len(), 2);
}

#[test]
fn corrupt_opens_rotate_at_most_three_backups() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("events.wal");

    for i in 1..=4u8 {
        {
            let mut f = std::fs::File::create(&path).unwrap();
            f.write_all(&[i; 8]).unwrap();
        }
        let wal = Wal::open(&path, 0).unwrap();
        assert_eq!(wal.write_seq(), 0);
    }

    assert_eq!(std::fs::read(path.with_extension("bak")).unwrap(), vec![4u8; 8]);
    assert_eq!(std::fs::read(path.with_extension("bak.2")).unwrap(), vec![3u8; 8]);
    assert_eq!(std::fs::read(path.with_extension("bak.3")).unwrap(), vec![2u8; 8]);
    assert!(!path.with_extension("bak.4").exists());
}

#[test]
fn open_with_binary_wal_data() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("events.wal");

    std::fs::write(&path, b"\x80\x81\x82\xff\xfe\n").unwrap();

    let wal = Wal::open(&path, 0).unwrap();
    assert_eq!(wal.write_seq(), 0);
    assert!(path.with_extension("bak").exists());
}

#[test]
fn valid_prefix_survives_binary_tail() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("events.wal");

    {
        let mut wal = Wal::open(&path, 0).unwrap();
        wal.append(&test_event("mch-1")).unwrap();
        wal.append(&test_event("mch-2")).unwrap();
        wal.flush().unwrap();
    }
    {
        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"\x80\x81\x82\xff\xfe\n").unwrap();
    }

    let wal = Wal::open(&path, 0).unwrap();
    assert_eq!(wal.write_seq(), 2);
    assert!(path.with_extension("bak").exists());

    let entries = wal.entries_after(0);
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].seq, 1);
    assert_eq!(entries[1].seq, 2);
}

#[test]
fn appends_after_recovery_continue_the_sequence() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("events.wal");

    {
        let mut wal = Wal::open(&path, 0).unwrap();
        wal.append(&test_event("mch-1")).unwrap();
        wal.flush().unwrap();
    }
    {
        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"garbage\n").unwrap();
    }

    let mut wal = Wal::open(&path, 0).unwrap();
    assert_eq!(wal.append(&test_event("mch-2")).unwrap(), 2);
    wal.flush().unwrap();

    // The rewritten log plus the new append both survive another reopen.
    let wal = Wal::open(&path, 0).unwrap();
    assert_eq!(wal.entries_after(0).len(), 2);
}
