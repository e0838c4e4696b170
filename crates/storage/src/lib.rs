// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! fd-storage: durable state for fleetd.
//!
//! An append-only WAL of [`fd_core::Event`]s plus periodic zstd snapshots.
//! [`MaterializedState`] is rebuilt by replay; the [`FleetCache`] mirrors
//! the read-hot slice for broadcasts.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod cache;
mod snapshot;
mod state;
mod wal;

pub use cache::{FleetCache, MachineSummary};
pub use snapshot::{load_snapshot, save_snapshot, Snapshot, SnapshotError};
pub use state::{MaterializedState, AUDIT_LOG_LIMIT, METRIC_HISTORY_LIMIT, OUTPUT_LIMIT_BYTES};
pub use wal::{Wal, WalEntry, WalError};
