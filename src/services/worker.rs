use futures::FutureExt;
use serde::Deserialize;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use strum::{Display, EnumString};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::services::jobs::{ClaimedJob, JobError, JobQueue};
use crate::services::pipeline::{Pipeline, PipelineError};

/// What happens to in-flight jobs when the pool is asked to stop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ShutdownPolicy {
    /// Let running jobs finish within the grace period, then send the
    /// stragglers back to pending like `Requeue`.
    #[default]
    Drain,
    /// Stop running jobs at their next stage boundary and put them back to pending.
    Requeue,
    /// Abort running jobs immediately; their rows stay `running`.
    Abandon,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub concurrency: usize,
    pub poll_interval: Duration,
    pub shutdown_policy: ShutdownPolicy,
    pub shutdown_grace: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", std::process::id()),
            concurrency: 4,
            poll_interval: Duration::from_millis(1000),
            shutdown_policy: ShutdownPolicy::Drain,
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

/// How a single job task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    /// Finished after a cancel; the result was thrown away.
    Discarded,
    Failed,
    Cancelled,
    Requeued,
    /// Bookkeeping after the job failed itself.
    Errored,
}

/// Totals for one run of the pool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolReport {
    pub completed: usize,
    pub discarded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub requeued: usize,
    pub errored: usize,
    pub aborted: usize,
}

impl PoolReport {
    fn record(&mut self, outcome: JobOutcome) {
        match outcome {
            JobOutcome::Completed => self.completed += 1,
            JobOutcome::Discarded => self.discarded += 1,
            JobOutcome::Failed => self.failed += 1,
            JobOutcome::Cancelled => self.cancelled += 1,
            JobOutcome::Requeued => self.requeued += 1,
            JobOutcome::Errored => self.errored += 1,
        }
    }
}

/// Bounded pool that claims jobs and runs them through the pipeline.
pub struct WorkerPool {
    queue: Arc<JobQueue>,
    pipeline: Arc<Pipeline>,
    config: WorkerConfig,
}

impl WorkerPool {
    pub fn new(queue: Arc<JobQueue>, pipeline: Arc<Pipeline>, config: WorkerConfig) -> Self {
        Self {
            queue,
            pipeline,
            config,
        }
    }

    /// Claim and process jobs until `shutdown` fires, then wind down
    /// in-flight jobs according to the shutdown policy.
    pub async fn run(&self, shutdown: CancellationToken) -> PoolReport {
        let concurrency = self.config.concurrency.max(1);
        let semaphore = Arc::new(Semaphore::new(concurrency));
        // Parent of every job token; cancelled to send in-flight jobs back to pending.
        let interrupt = CancellationToken::new();
        let mut tasks: JoinSet<(Uuid, JobOutcome)> = JoinSet::new();
        let mut running: HashMap<tokio::task::Id, Uuid> = HashMap::new();
        let mut report = PoolReport::default();

        tracing::info!(
            worker_id = %self.config.worker_id,
            concurrency,
            policy = %self.config.shutdown_policy,
            "Worker pool started"
        );

        loop {
            while let Some(joined) = tasks.try_join_next_with_id() {
                self.record_join(&mut running, &mut report, joined);
            }

            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            match self.queue.claim(&self.config.worker_id, &interrupt).await {
                Ok(Some(claimed)) => {
                    let queue = self.queue.clone();
                    let pipeline = self.pipeline.clone();
                    let interrupt = interrupt.clone();
                    let job_id = claimed.job.id;
                    let handle = tasks.spawn(async move {
                        let outcome = process_job(&queue, &pipeline, claimed, &interrupt).await;
                        drop(permit);
                        (job_id, outcome)
                    });
                    running.insert(handle.id(), job_id);
                }
                Ok(None) => {
                    drop(permit);
                    if let Err(e) = self.queue.queue_depth().await {
                        tracing::debug!(error = %e, "Failed to read queue depth");
                    }
                    if self.idle(&shutdown).await {
                        break;
                    }
                }
                Err(e) => {
                    drop(permit);
                    tracing::error!(worker_id = %self.config.worker_id, error = %e, "Failed to claim job");
                    if self.idle(&shutdown).await {
                        break;
                    }
                }
            }
        }

        tracing::info!(
            worker_id = %self.config.worker_id,
            in_flight = tasks.len(),
            policy = %self.config.shutdown_policy,
            "Worker pool stopping"
        );

        let grace = self.config.shutdown_grace;
        match self.config.shutdown_policy {
            ShutdownPolicy::Drain => {
                if !self.drain_within(grace, &mut tasks, &mut running, &mut report).await {
                    tracing::warn!(
                        remaining = tasks.len(),
                        grace_secs = grace.as_secs(),
                        "Grace period elapsed, requeueing remaining jobs"
                    );
                    self.interrupt(&interrupt, &mut tasks, &mut running, &mut report).await;
                }
            }
            ShutdownPolicy::Requeue => {
                self.interrupt(&interrupt, &mut tasks, &mut running, &mut report).await;
            }
            ShutdownPolicy::Abandon => {
                tasks.abort_all();
                self.drain(&mut tasks, &mut running, &mut report).await;
            }
        }

        tracing::info!(worker_id = %self.config.worker_id, ?report, "Worker pool stopped");
        report
    }

    /// Sleep one poll interval. Returns `true` if shutdown fired meanwhile.
    async fn idle(&self, shutdown: &CancellationToken) -> bool {
        tokio::select! {
            _ = shutdown.cancelled() => true,
            _ = tokio::time::sleep(self.config.poll_interval) => false,
        }
    }

    /// Stop in-flight jobs at their next boundary so they go back to
    /// pending. Jobs that still do not stop within the grace period are
    /// aborted.
    async fn interrupt(
        &self,
        interrupt: &CancellationToken,
        tasks: &mut JoinSet<(Uuid, JobOutcome)>,
        running: &mut HashMap<tokio::task::Id, Uuid>,
        report: &mut PoolReport,
    ) {
        interrupt.cancel();
        if !self.drain_within(self.config.shutdown_grace, tasks, running, report).await {
            tracing::error!(remaining = tasks.len(), "Jobs ignored the interrupt, aborting them");
            tasks.abort_all();
            self.drain(tasks, running, report).await;
        }
    }

    /// Wait for every task up to `grace`. Returns `false` if some are left.
    async fn drain_within(
        &self,
        grace: Duration,
        tasks: &mut JoinSet<(Uuid, JobOutcome)>,
        running: &mut HashMap<tokio::task::Id, Uuid>,
        report: &mut PoolReport,
    ) -> bool {
        tokio::time::timeout(grace, self.drain(tasks, running, report))
            .await
            .is_ok()
    }

    async fn drain(
        &self,
        tasks: &mut JoinSet<(Uuid, JobOutcome)>,
        running: &mut HashMap<tokio::task::Id, Uuid>,
        report: &mut PoolReport,
    ) {
        while let Some(joined) = tasks.join_next_with_id().await {
            self.record_join(running, report, joined);
        }
    }

    fn record_join(
        &self,
        running: &mut HashMap<tokio::task::Id, Uuid>,
        report: &mut PoolReport,
        joined: Result<(tokio::task::Id, (Uuid, JobOutcome)), tokio::task::JoinError>,
    ) {
        match joined {
            Ok((task_id, (job_id, outcome))) => {
                running.remove(&task_id);
                tracing::debug!(job_id = %job_id, ?outcome, "Job task finished");
                report.record(outcome);
            }
            Err(e) => {
                let job_id = running.remove(&e.id());
                if let Some(job_id) = job_id {
                    // The task never settled its job; drop the local hold.
                    self.queue.forget(job_id);
                }
                if e.is_cancelled() {
                    tracing::warn!(job_id = ?job_id, "Job task aborted");
                    report.aborted += 1;
                } else {
                    // Panics are caught inside the task, so this is unexpected.
                    tracing::error!(job_id = ?job_id, error = %e, "Job task failed");
                    report.errored += 1;
                }
            }
        }
    }
}

/// Run one claimed job and record its terminal state.
pub async fn process_job(
    queue: &JobQueue,
    pipeline: &Pipeline,
    claimed: ClaimedJob,
    interrupt: &CancellationToken,
) -> JobOutcome {
    let job_id = claimed.job.id;
    let run = AssertUnwindSafe(pipeline.run(queue, &claimed)).catch_unwind().await;

    let settled: Result<JobOutcome, JobError> = match run {
        Ok(Ok(result)) => {
            let produced = result.creatives.clone();
            match queue.complete(&claimed, result).await {
                Ok(true) => Ok(JobOutcome::Completed),
                Ok(false) => {
                    // Cancelled while it ran: the creatives belong to no finished job.
                    pipeline.discard(job_id, &produced).await;
                    Ok(JobOutcome::Discarded)
                }
                Err(e) => Err(e),
            }
        }
        Ok(Err(PipelineError::Cancelled)) if interrupt.is_cancelled() => queue
            .requeue(&claimed)
            .await
            .map(|requeued| if requeued { JobOutcome::Requeued } else { JobOutcome::Cancelled }),
        Ok(Err(PipelineError::Cancelled)) => queue.release(&claimed).await.map(|_| JobOutcome::Cancelled),
        Ok(Err(e)) => queue
            .fail(&claimed, &e.to_string())
            .await
            .map(|_| JobOutcome::Failed),
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            tracing::error!(job_id = %job_id, panic = %message, "Job task panicked");
            queue
                .fail(&claimed, &format!("worker panicked: {message}"))
                .await
                .map(|_| JobOutcome::Failed)
        }
    };

    settled.unwrap_or_else(|e| {
        tracing::error!(job_id = %job_id, error = %e, "Failed to settle job");
        JobOutcome::Errored
    })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
