// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CVE mirror and matcher.
//!
//! Periodic OSV ingest for the ecosystems actually present in the fleet,
//! with an at-most-one-concurrent-sync state machine, plus per-machine
//! match recomputation after scans.

pub mod matcher;
mod osv;
pub mod versions;

pub use osv::OsvClient;

use crate::seams::EventSink;
use fd_core::{
    AuditAction, AuditEntry, Clock, CveSyncStats, Ecosystem, Event, Fault, MachineId,
    VulnerabilitySummary,
};
use fd_storage::MaterializedState;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Records upserted per `cve:synced` event.
const SYNC_BATCH: usize = 200;

/// Mirror tunables.
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    pub base_url: String,
    pub sync_interval: Duration,
    pub start_delay: Duration,
    pub request_timeout: Duration,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.osv.dev".to_string(),
            sync_interval: Duration::from_secs(2 * 60 * 60),
            start_delay: Duration::from_secs(30),
            request_timeout: Duration::from_secs(60),
        }
    }
}

pub struct CveMirror<C: Clock> {
    state: Arc<Mutex<MaterializedState>>,
    sink: Arc<dyn EventSink>,
    clock: C,
    client: OsvClient,
    config: MirrorConfig,
    running: AtomicBool,
    last_error: Mutex<Option<String>>,
}

impl<C: Clock + 'static> CveMirror<C> {
    pub fn new(
        state: Arc<Mutex<MaterializedState>>,
        sink: Arc<dyn EventSink>,
        clock: C,
        config: MirrorConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            state,
            sink,
            clock,
            client: OsvClient::new(config.base_url.clone(), config.request_timeout),
            config,
            running: AtomicBool::new(false),
            last_error: Mutex::new(None),
        })
    }

    /// Current mirror state for `GET /security/cve`.
    pub fn status(&self) -> fd_wire::CveStatusView {
        let state = self.state.lock();
        let last = state.cve_sync_history.last();
        fd_wire::CveStatusView {
            status: if self.running.load(Ordering::SeqCst) {
                "running".to_string()
            } else if self.last_error.lock().is_some() {
                "error".to_string()
            } else {
                "idle".to_string()
            },
            accepted: None,
            cve_count: state.cves.len() as u64,
            last_completed_at_ms: last.map(|s| s.completed_at_ms),
            last_error: self.last_error.lock().clone(),
        }
    }

    /// Manual trigger. A second trigger while running returns
    /// [`Fault::AlreadyRunning`] without starting a second job.
    pub fn trigger(self: &Arc<Self>) -> Result<(), Fault> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(Fault::AlreadyRunning);
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.sync_and_record().await;
        });
        Ok(())
    }

    /// Background schedule: one sync after the start delay, then one every
    /// interval, until cancelled.
    pub async fn run_schedule(self: Arc<Self>, cancel: CancellationToken) {
        tokio::select! {
            _ = tokio::time::sleep(self.config.start_delay) => {}
            _ = cancel.cancelled() => return,
        }

        loop {
            if let Err(Fault::AlreadyRunning) = self.trigger() {
                info!("CVE sync already running, skipping scheduled run");
            }
            tokio::select! {
                _ = tokio::time::sleep(self.config.sync_interval) => {}
                _ = cancel.cancelled() => return,
            }
        }
    }

    async fn sync_and_record(self: &Arc<Self>) {
        let started_ms = self.clock.epoch_ms();
        let result = self.sync_once().await;
        let now_ms = self.clock.epoch_ms();

        match result {
            Ok(mut stats) => {
                stats.duration_ms = now_ms.saturating_sub(started_ms);
                stats.completed_at_ms = now_ms;
                *self.last_error.lock() = None;
                let fetched = stats.fetched;
                let upserted = stats.upserted;
                let _ = self.sink.emit(Event::CveSyncCompleted { stats });
                self.sink.audit(
                    AuditEntry::new(AuditAction::CveSyncCompleted, now_ms).with_details(
                        serde_json::json!({ "fetched": fetched, "upserted": upserted }),
                    ),
                );
                info!(fetched, upserted, "CVE sync completed");
            }
            Err(fault) => {
                let message = fault.kind().to_string();
                *self.last_error.lock() = Some(message.clone());
                let _ = self.sink.emit(Event::CveSyncCompleted {
                    stats: CveSyncStats {
                        completed_at_ms: now_ms,
                        duration_ms: now_ms.saturating_sub(started_ms),
                        error: Some(message.clone()),
                        ..Default::default()
                    },
                });
                self.sink.audit(
                    AuditEntry::new(AuditAction::CveSyncFailed, now_ms)
                        .with_details(serde_json::json!({ "kind": message })),
                );
                warn!(kind = %fault.kind(), "CVE sync failed");
            }
        }

        self.running.store(false, Ordering::SeqCst);
    }

    /// One full sync pass over every (ecosystem, package) seen in the
    /// fleet.
    async fn sync_once(&self) -> Result<CveSyncStats, Fault> {
        // Union of package managers across machines decides the active
        // ecosystems and the package list per ecosystem.
        let targets: BTreeSet<(String, String)> = {
            let state = self.state.lock();
            state
                .packages
                .values()
                .flatten()
                .filter_map(|p| {
                    Ecosystem::from_manager(&p.manager)
                        .map(|e| (e.to_string(), p.name.clone()))
                })
                .collect()
        };

        let mut stats = CveSyncStats::default();
        let mut batch = Vec::new();
        let mut per_ecosystem: Vec<(String, u32)> = Vec::new();

        for (ecosystem_name, package_name) in &targets {
            let Some(ecosystem) = parse_ecosystem(ecosystem_name) else {
                continue;
            };
            let (records, pages) = self.client.query_package(ecosystem, package_name).await?;
            stats.pages += pages;
            stats.fetched += records.len() as u32;

            match per_ecosystem.iter_mut().find(|(name, _)| name == ecosystem_name) {
                Some((_, count)) => *count += records.len() as u32,
                None => per_ecosystem.push((ecosystem_name.clone(), records.len() as u32)),
            }

            for record in records {
                let fresh = {
                    let state = self.state.lock();
                    state.cves.get(&record.id) != Some(&record)
                };
                if fresh {
                    stats.upserted += 1;
                }
                batch.push(record);
                if batch.len() >= SYNC_BATCH {
                    self.sink.emit(Event::CveSynced { records: std::mem::take(&mut batch) })?;
                }
            }
        }

        if !batch.is_empty() {
            self.sink.emit(Event::CveSynced { records: batch })?;
        }
        stats.per_ecosystem = per_ecosystem;
        Ok(stats)
    }

    /// Recompute one machine's matches after a scan and persist them.
    /// Returns the aggregate for the `vulnerability` security event.
    pub fn recompute_matches(&self, machine_id: &MachineId) -> Result<VulnerabilitySummary, Fault> {
        let matches = {
            let state = self.state.lock();
            matcher::compute_matches(&state, machine_id)
        };
        let summary = VulnerabilitySummary::tally(&matches);
        self.sink.emit(Event::VulnerabilityMatchesRecomputed {
            machine_id: *machine_id,
            matches,
        })?;
        Ok(summary)
    }
}

fn parse_ecosystem(name: &str) -> Option<Ecosystem> {
    match name {
        "debian" => Some(Ecosystem::Debian),
        "alpine" => Some(Ecosystem::Alpine),
        "npm" => Some(Ecosystem::Npm),
        "pypi" => Some(Ecosystem::Pypi),
        "maven" => Some(Ecosystem::Maven),
        "nuget" => Some(Ecosystem::Nuget),
        "go" => Some(Ecosystem::Go),
        "crates" => Some(Ecosystem::Crates),
        "packagist" => Some(Ecosystem::Packagist),
        "rubygems" => Some(Ecosystem::Rubygems),
        _ => None,
    }
}

#[cfg(test)]
#[path = "mirror_tests.rs"]
mod tests;
