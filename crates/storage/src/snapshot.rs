// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Point-in-time snapshots of materialized state.
//!
//! zstd-compressed JSON `{seq, state}`, written atomically (tmp + rename).
//! A snapshot that fails to decode is rotated aside rather than blocking
//! startup; the WAL replays from zero in that case.

use crate::state::MaterializedState;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use thiserror::Error;
use tracing::warn;

/// zstd level: snapshots are written on a background cadence, favor ratio.
const COMPRESSION_LEVEL: i32 = 3;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A recovered snapshot: state as of WAL sequence `seq`.
#[derive(Debug, Serialize, Deserialize)]
pub struct Snapshot {
    pub seq: u64,
    pub state: MaterializedState,
}

/// Write a snapshot atomically.
pub fn save_snapshot(
    path: &Path,
    state: &MaterializedState,
    seq: u64,
) -> Result<(), SnapshotError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    {
        let file = File::create(&tmp)?;
        let mut encoder = zstd::stream::Encoder::new(BufWriter::new(file), COMPRESSION_LEVEL)?;
        serde_json::to_writer(&mut encoder, &Snapshot { seq, state: state.clone() })?;
        let writer = encoder.finish()?;
        writer.into_inner().map_err(|e| e.into_error())?.sync_data()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Load the snapshot if present and readable.
///
/// A corrupt snapshot is moved to `.bak` and treated as absent so the
/// daemon can still start from the WAL.
pub fn load_snapshot(path: &Path) -> Result<Option<Snapshot>, SnapshotError> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let decode = || -> Result<Snapshot, SnapshotError> {
        let decoder = zstd::stream::Decoder::new(BufReader::new(file))?;
        Ok(serde_json::from_reader(decoder)?)
    };

    match decode() {
        Ok(snapshot) => Ok(Some(snapshot)),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "corrupt snapshot, rotating aside");
            let _ = std::fs::rename(path, path.with_extension("bak"));
            Ok(None)
        }
    }
}

#[cfg(test)]
#[path = "snapshot_tests.rs"]
mod tests;
