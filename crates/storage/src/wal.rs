// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Write-ahead log of persisted events.
//!
//! One JSON object per line: `{"seq": N, "event": {...}}`. Appends are
//! buffered through a `BufWriter`; `flush` pushes them to disk and fsyncs.
//! A corrupt tail found at open is rotated to `.bak` (up to three backups
//! kept) and the valid prefix rewritten in place.

use fd_core::Event;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use tracing::warn;

/// Buffered appends that trigger `needs_flush`.
const FLUSH_THRESHOLD: usize = 100;

/// Elapsed time since the last flush that triggers `needs_flush`.
const FLUSH_INTERVAL_MS: u128 = 1_000;

/// Backup files kept when rotating a corrupt WAL (.bak, .bak.2, .bak.3).
const MAX_BACKUPS: u32 = 3;

#[derive(Debug, Error)]
pub enum WalError {
    #[error("WAL I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAL entry serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One sequenced entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalEntry {
    pub seq: u64,
    pub event: Event,
}

/// Append-only event log with replay cursors.
pub struct Wal {
    path: PathBuf,
    writer: BufWriter<File>,
    /// All valid entries currently in the log (bounded by snapshot
    /// truncation, see `truncate_before`).
    entries: Vec<WalEntry>,
    /// Last appended sequence number.
    write_seq: u64,
    /// Last sequence the engine marked as processed.
    processed_seq: u64,
    /// Cursor for `next_unprocessed`.
    read_seq: u64,
    /// Appends since the last flush.
    pending: usize,
    last_flush: Instant,
}

impl Wal {
    /// Open or create the WAL at `path`.
    ///
    /// `processed_seq` comes from the snapshot and positions the replay
    /// cursor: entries at or below it are considered already applied.
    pub fn open(path: &Path, processed_seq: u64) -> Result<Self, WalError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let (entries, corrupt) = read_valid_entries(path)?;
        if corrupt {
            rotate_backups(path)?;
            rewrite_clean(path, &entries)?;
        }

        let write_seq = entries.last().map(|e| e.seq).unwrap_or(0);
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            entries,
            write_seq,
            processed_seq,
            read_seq: processed_seq,
            pending: 0,
            last_flush: Instant::now(),
        })
    }

    /// Append an event, returning its sequence number.
    pub fn append(&mut self, event: &Event) -> Result<u64, WalError> {
        let seq = self.write_seq + 1;
        let entry = WalEntry { seq, event: event.clone() };
        let line = serde_json::to_string(&entry)?;
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.entries.push(entry);
        self.write_seq = seq;
        self.pending += 1;
        Ok(seq)
    }

    /// Flush buffered appends to disk and fsync.
    pub fn flush(&mut self) -> Result<(), WalError> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        self.pending = 0;
        self.last_flush = Instant::now();
        Ok(())
    }

    /// Whether enough writes or time accumulated to warrant a flush.
    pub fn needs_flush(&self) -> bool {
        self.pending > 0
            && (self.pending >= FLUSH_THRESHOLD
                || self.last_flush.elapsed().as_millis() >= FLUSH_INTERVAL_MS)
    }

    /// Next entry after the read cursor, advancing it. Returns `None` when
    /// caught up.
    pub fn next_unprocessed(&mut self) -> Option<WalEntry> {
        let next = self.entries.iter().find(|e| e.seq > self.read_seq)?.clone();
        self.read_seq = next.seq;
        Some(next)
    }

    /// Record that the engine finished applying `seq`.
    pub fn mark_processed(&mut self, seq: u64) {
        if seq > self.processed_seq {
            self.processed_seq = seq;
        }
    }

    /// All entries with seq strictly greater than `seq`.
    pub fn entries_after(&self, seq: u64) -> Vec<WalEntry> {
        self.entries.iter().filter(|e| e.seq > seq).cloned().collect()
    }

    /// Drop entries below `seq` and rewrite the log. Called after a
    /// snapshot makes the prefix redundant.
    pub fn truncate_before(&mut self, seq: u64) -> Result<(), WalError> {
        self.flush()?;
        self.entries.retain(|e| e.seq >= seq);
        rewrite_clean(&self.path, &self.entries)?;
        let file = OpenOptions::new().append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        Ok(())
    }

    pub fn write_seq(&self) -> u64 {
        self.write_seq
    }

    pub fn processed_seq(&self) -> u64 {
        self.processed_seq
    }
}

/// Read the valid entry prefix of the log. Returns `(entries, corrupt)`
/// where `corrupt` is true when trailing garbage was found.
fn read_valid_entries(path: &Path) -> Result<(Vec<WalEntry>, bool), WalError> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((Vec::new(), false)),
        Err(e) => return Err(e.into()),
    };

    let mut entries = Vec::new();
    let mut reader = BufReader::new(file);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let n = reader.read_until(b'\n', &mut buf)?;
        if n == 0 {
            break;
        }
        let line = match std::str::from_utf8(&buf) {
            Ok(s) => s.trim(),
            Err(_) => {
                warn!(path = %path.display(), "binary data in WAL, truncating at corruption");
                return Ok((entries, true));
            }
        };
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<WalEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(_) => {
                warn!(path = %path.display(), "corrupt WAL entry, truncating at corruption");
                return Ok((entries, true));
            }
        }
    }
    Ok((entries, false))
}

/// Shift `.bak` → `.bak.2` → `.bak.3` and copy the current file to `.bak`.
fn rotate_backups(path: &Path) -> Result<(), WalError> {
    let bak = |n: u32| {
        if n == 1 {
            path.with_extension("bak")
        } else {
            path.with_extension(format!("bak.{}", n))
        }
    };
    for n in (1..MAX_BACKUPS).rev() {
        let from = bak(n);
        if from.exists() {
            std::fs::rename(&from, bak(n + 1))?;
        }
    }
    std::fs::copy(path, bak(1))?;
    Ok(())
}

/// Atomically replace the log with only the given entries.
fn rewrite_clean(path: &Path, entries: &[WalEntry]) -> Result<(), WalError> {
    let tmp = path.with_extension("tmp");
    {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        for entry in entries {
            let line = serde_json::to_string(entry)?;
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        writer.get_ref().sync_data()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
#[path = "wal_tests.rs"]
mod tests;
