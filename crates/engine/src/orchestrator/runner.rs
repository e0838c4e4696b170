// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job runner: drives one bulk job to a terminal state.

use super::Orchestrator;
use fd_core::{Clock, Event, ExecutionId, ExecutionStatus, JobId, JobMode, JobStatus, MachineId};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{info, warn};

/// Live tallies for one job's executions.
#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    pending: u32,
    running: u32,
    success: u32,
    failed: u32,
    aborted: u32,
    total: u32,
}

impl Tally {
    fn all_terminal(&self) -> bool {
        self.pending == 0 && self.running == 0
    }

    /// Whether failed/total reached the stop threshold.
    fn threshold_hit(&self, stop_on_failure_percent: u32) -> bool {
        if self.total == 0 {
            return false;
        }
        u64::from(self.failed) * 100 >= u64::from(self.total) * u64::from(stop_on_failure_percent)
    }

    fn final_status(&self) -> JobStatus {
        if self.failed > 0 {
            JobStatus::Failed
        } else if self.aborted > 0 {
            JobStatus::Aborted
        } else {
            JobStatus::Success
        }
    }
}

impl<C: Clock + 'static> Orchestrator<C> {
    pub(super) async fn run_job(self: Arc<Self>, job_id: JobId) {
        let Some(job) = self.state.lock().get_job(job_id.as_str()).cloned() else {
            warn!(job = %job_id, "runner started for unknown job");
            return;
        };

        let _ = self.sink.emit(Event::JobStatusChanged {
            id: job_id,
            status: JobStatus::Running,
            at_ms: self.clock.epoch_ms(),
        });

        let outcome = match job.mode {
            JobMode::Parallel => self.run_parallel(&job).await,
            JobMode::Rolling => self.run_rolling(&job).await,
        };

        let _ = self.sink.emit(Event::JobStatusChanged {
            id: job_id,
            status: outcome,
            at_ms: self.clock.epoch_ms(),
        });
        info!(job = %job_id, status = %outcome, "bulk job finished");
        self.release_job(&job_id);
    }

    /// Parallel strategy: keep up to `concurrency` executions in flight;
    /// stop dispatching once the failure threshold trips.
    async fn run_parallel(&self, job: &fd_core::BulkJob) -> JobStatus {
        let job_id = job.id;
        let stop_percent = job.strategy.stop_on_failure_percent;
        let concurrency = job.strategy.concurrency.max(1);
        let notify = self.job_notify(&job_id);
        let mut threshold_tripped = false;

        loop {
            if self.abort_requested(&job_id) {
                return self.finish_aborted(job).await;
            }
            let _ = self.sweep_reconnect_deadlines();

            let tally = self.tally(&job_id);

            if !threshold_tripped
                && tally.failed > 0
                && tally.threshold_hit(stop_percent)
                && tally.pending > 0
            {
                threshold_tripped = true;
                self.abort_pending(&job_id);
            }

            let tally = self.tally(&job_id);
            if tally.all_terminal() {
                return if threshold_tripped { JobStatus::Failed } else { tally.final_status() };
            }

            if !threshold_tripped {
                let slots = concurrency.saturating_sub(tally.running);
                for (execution_id, machine_id) in self.next_pending(&job_id, slots) {
                    self.start_execution(&job_id, &execution_id, &machine_id, &job.command).await;
                }
            }

            self.wait_for_progress(&notify).await;
        }
    }

    /// Rolling strategy: fixed-size waves with pauses between them. The
    /// threshold is evaluated between waves; running executions are never
    /// cancelled by it.
    async fn run_rolling(&self, job: &fd_core::BulkJob) -> JobStatus {
        let job_id = job.id;
        let stop_percent = job.strategy.stop_on_failure_percent;
        let batch_size = job.strategy.batch_size.max(1) as usize;
        let notify = self.job_notify(&job_id);

        let all: Vec<(ExecutionId, MachineId)> = {
            let state = self.state.lock();
            state
                .executions_for_job(job_id.as_str())
                .iter()
                .map(|e| (e.id, e.machine_id))
                .collect()
        };

        let mut first = true;
        for batch in all.chunks(batch_size) {
            if self.abort_requested(&job_id) {
                return self.finish_aborted(job).await;
            }

            let tally = self.tally(&job_id);
            if tally.threshold_hit(stop_percent) && tally.failed > 0 {
                // No further batches; what is already running drains
                // below, pending work is aborted.
                self.abort_pending(&job_id);
                self.drain_running(&job_id, &notify).await;
                return JobStatus::Failed;
            }

            if !first {
                tokio::time::sleep(Duration::from_secs(job.strategy.wait_seconds)).await;
            }
            first = false;

            for (execution_id, machine_id) in batch {
                if self.abort_requested(&job_id) {
                    return self.finish_aborted(job).await;
                }
                self.start_execution(&job_id, execution_id, machine_id, &job.command).await;
            }

            // Wait for the whole wave to reach a terminal state.
            loop {
                if self.abort_requested(&job_id) {
                    return self.finish_aborted(job).await;
                }
                let _ = self.sweep_reconnect_deadlines();
                let done = {
                    let state = self.state.lock();
                    batch.iter().all(|(id, _)| {
                        state
                            .executions
                            .get(id.as_str())
                            .map(|e| e.status.is_terminal())
                            .unwrap_or(true)
                    })
                };
                if done {
                    break;
                }
                self.wait_for_progress(&notify).await;
            }
        }

        let tally = self.tally(&job_id);
        if tally.threshold_hit(stop_percent) && tally.failed > 0 {
            JobStatus::Failed
        } else {
            tally.final_status()
        }
    }

    /// Abort path shared by both strategies: pending → aborted, cancels to
    /// running targets, grace wait, force-abort stragglers.
    async fn finish_aborted(&self, job: &fd_core::BulkJob) -> JobStatus {
        let job_id = job.id;
        self.abort_pending(&job_id);

        let running: Vec<(ExecutionId, MachineId)> = {
            let state = self.state.lock();
            state
                .executions_for_job(job_id.as_str())
                .iter()
                .filter(|e| e.status == ExecutionStatus::Running)
                .map(|e| (e.id, e.machine_id))
                .collect()
        };
        for (execution_id, machine_id) in &running {
            self.send_cancel(machine_id, execution_id.as_str()).await;
        }

        // Grace window for cancel acks.
        let notify = self.job_notify(&job_id);
        let deadline = self.clock.epoch_ms() + self.config.kill_grace_ms;
        while self.clock.epoch_ms() < deadline {
            if self.tally(&job_id).running == 0 {
                break;
            }
            self.wait_for_progress(&notify).await;
        }

        // Force anything still running to aborted.
        let stragglers: Vec<ExecutionId> = {
            let state = self.state.lock();
            state
                .executions_for_job(job_id.as_str())
                .iter()
                .filter(|e| e.status == ExecutionStatus::Running)
                .map(|e| e.id)
                .collect()
        };
        for execution_id in stragglers {
            let _ = self.sink.emit(Event::ExecutionStatusChanged {
                id: execution_id,
                status: ExecutionStatus::Aborted,
                exit_code: None,
                error: Some("aborted by kill switch".to_string()),
            });
        }

        JobStatus::Aborted
    }

    /// Inline abort for jobs with no live runner (post-restart).
    pub(super) fn finalize_abort_without_runner(
        &self,
        job_id: &JobId,
    ) -> Result<(), fd_core::Fault> {
        let non_terminal: Vec<ExecutionId> = {
            let state = self.state.lock();
            state
                .executions_for_job(job_id.as_str())
                .iter()
                .filter(|e| !e.status.is_terminal())
                .map(|e| e.id)
                .collect()
        };
        for execution_id in non_terminal {
            self.sink.emit(Event::ExecutionStatusChanged {
                id: execution_id,
                status: ExecutionStatus::Aborted,
                exit_code: None,
                error: Some("aborted by kill switch".to_string()),
            })?;
        }
        self.sink.emit(Event::JobStatusChanged {
            id: *job_id,
            status: JobStatus::Aborted,
            at_ms: self.clock.epoch_ms(),
        })
    }

    // --- small helpers ---

    async fn start_execution(
        &self,
        job_id: &JobId,
        execution_id: &ExecutionId,
        machine_id: &MachineId,
        command: &str,
    ) {
        let _ = self.sink.emit(Event::ExecutionStatusChanged {
            id: *execution_id,
            status: ExecutionStatus::Running,
            exit_code: None,
            error: None,
        });

        if let Err(reason) = self
            .dispatch_work(Some(job_id), execution_id.as_str(), machine_id, command)
            .await
        {
            let _ = self.sink.emit(Event::ExecutionStatusChanged {
                id: *execution_id,
                status: ExecutionStatus::Failed,
                exit_code: None,
                error: Some(reason),
            });
        }
    }

    fn tally(&self, job_id: &JobId) -> Tally {
        let state = self.state.lock();
        let mut tally = Tally::default();
        for execution in state.executions_for_job(job_id.as_str()) {
            tally.total += 1;
            match execution.status {
                ExecutionStatus::Pending => tally.pending += 1,
                ExecutionStatus::Running => tally.running += 1,
                ExecutionStatus::Success => tally.success += 1,
                ExecutionStatus::Failed => tally.failed += 1,
                ExecutionStatus::Aborted => tally.aborted += 1,
            }
        }
        tally
    }

    /// Up to `limit` pending executions, in deterministic order.
    fn next_pending(&self, job_id: &JobId, limit: u32) -> Vec<(ExecutionId, MachineId)> {
        let state = self.state.lock();
        state
            .executions_for_job(job_id.as_str())
            .iter()
            .filter(|e| e.status == ExecutionStatus::Pending)
            .take(limit as usize)
            .map(|e| (e.id, e.machine_id))
            .collect()
    }

    fn abort_pending(&self, job_id: &JobId) {
        let pending: Vec<ExecutionId> = {
            let state = self.state.lock();
            state
                .executions_for_job(job_id.as_str())
                .iter()
                .filter(|e| e.status == ExecutionStatus::Pending)
                .map(|e| e.id)
                .collect()
        };
        for execution_id in pending {
            let _ = self.sink.emit(Event::ExecutionStatusChanged {
                id: execution_id,
                status: ExecutionStatus::Aborted,
                exit_code: None,
                error: None,
            });
        }
    }

    async fn drain_running(&self, job_id: &JobId, notify: &Arc<Notify>) {
        while self.tally(job_id).running > 0 {
            self.wait_for_progress(notify).await;
        }
    }

    fn abort_requested(&self, job_id: &JobId) -> bool {
        self.jobs
            .lock()
            .get(job_id.as_str())
            .map(|h| h.abort.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    fn job_notify(&self, job_id: &JobId) -> Arc<Notify> {
        self.jobs
            .lock()
            .get(job_id.as_str())
            .map(|h| Arc::clone(&h.notify))
            .unwrap_or_default()
    }

    /// Park until an agent completion nudges us or the tick elapses.
    async fn wait_for_progress(&self, notify: &Arc<Notify>) {
        tokio::select! {
            _ = notify.notified() => {}
            _ = tokio::time::sleep(Duration::from_millis(self.config.poll_interval_ms)) => {}
        }
    }
}
