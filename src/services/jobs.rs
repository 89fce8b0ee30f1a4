use garde::Validate;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::db::{CancelOutcome, CatalogStore, JobStore, StoreError};
use crate::models::job::{Job, JobKind, JobPayload, JobResult, JobStatus};
use crate::services::progress::{ProgressEvent, ProgressHub};
use crate::services::queue::{JobBroker, QueueError, QueuedJob};

/// A job handed to exactly one worker, with its abort signal.
pub struct ClaimedJob {
    pub job: Job,
    pub entry: QueuedJob,
    pub cancel: CancellationToken,
}

/// Result of a cancel request.
#[derive(Debug, Clone)]
pub struct CancelResult {
    pub job: Job,
    /// `false` when the job was already terminal and nothing changed.
    pub changed: bool,
}

/// Producer/consumer façade over the job store, the broker and the
/// progress hub.
///
/// Producers call [`enqueue`](Self::enqueue), [`get_status`](Self::get_status)
/// and [`cancel`](Self::cancel). Workers call [`claim`](Self::claim), report
/// progress and finish with [`complete`](Self::complete),
/// [`fail`](Self::fail) or [`requeue`](Self::requeue).
pub struct JobQueue {
    store: Arc<dyn JobStore>,
    catalog: Arc<dyn CatalogStore>,
    broker: Arc<dyn JobBroker>,
    progress: Arc<ProgressHub>,
    active: Mutex<HashMap<Uuid, CancellationToken>>,
}

impl JobQueue {
    pub fn new(
        store: Arc<dyn JobStore>,
        catalog: Arc<dyn CatalogStore>,
        broker: Arc<dyn JobBroker>,
        progress: Arc<ProgressHub>,
    ) -> Self {
        Self {
            store,
            catalog,
            broker,
            progress,
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn progress(&self) -> &Arc<ProgressHub> {
        &self.progress
    }

    /// Validate a request and queue it.
    ///
    /// All checks run before the job row is written, so a rejected request
    /// leaves no trace.
    pub async fn enqueue(&self, kind: JobKind, payload: JobPayload) -> Result<Job, JobError> {
        payload
            .validate()
            .map_err(|e| JobError::Validation(e.to_string()))?;

        if let Some(reason) = payload.missing_references(kind) {
            return Err(JobError::Validation(reason.to_string()));
        }

        if let Some(brand_id) = payload.brand_id {
            if self.catalog.get_brand(brand_id).await?.is_none() {
                return Err(JobError::NotFound {
                    entity: "brand",
                    id: brand_id,
                });
            }
        }
        for template_id in payload.templates() {
            if self.catalog.get_template(template_id).await?.is_none() {
                return Err(JobError::NotFound {
                    entity: "template",
                    id: template_id,
                });
            }
        }

        let job = Job::new(kind, payload);
        self.store.insert_job(&job).await?;

        let entry = QueuedJob {
            job_id: job.id,
            kind,
        };
        if let Err(e) = self.broker.push(&entry).await {
            tracing::error!(job_id = %job.id, error = %e, "Failed to push job to broker");
            // Nobody will ever claim it; do not leave a pending row behind.
            self.store.cancel_job(job.id).await?;
            return Err(e.into());
        }

        metrics::counter!("creative_jobs_total", "kind" => kind.to_string()).increment(1);
        tracing::info!(job_id = %job.id, kind = %kind, "Job enqueued");

        Ok(job)
    }

    pub async fn get_status(&self, job_id: Uuid) -> Result<Job, JobError> {
        self.store
            .get_job(job_id)
            .await?
            .ok_or(JobError::NotFound {
                entity: "job",
                id: job_id,
            })
    }

    /// Cancel a job. Cancelling a terminal job is a no-op.
    pub async fn cancel(&self, job_id: Uuid) -> Result<CancelResult, JobError> {
        match self.store.cancel_job(job_id).await? {
            None => Err(JobError::NotFound {
                entity: "job",
                id: job_id,
            }),
            Some(CancelOutcome::AlreadyTerminal(job)) => {
                tracing::debug!(job_id = %job_id, status = %job.status, "Cancel ignored, job already terminal");
                Ok(CancelResult { job, changed: false })
            }
            Some(CancelOutcome::Cancelled(job)) => {
                if let Some(token) = self.active_token(job_id) {
                    token.cancel();
                }
                self.progress.publish(ProgressEvent::Cancelled { job_id });
                metrics::counter!("creative_jobs_cancelled").increment(1);
                tracing::info!(job_id = %job_id, "Job cancelled");
                Ok(CancelResult { job, changed: true })
            }
        }
    }

    /// Take the next job off the broker and claim its row for `worker_id`.
    ///
    /// Entries whose row is no longer pending (cancelled while queued, or
    /// duplicated by recovery) are acknowledged and skipped. The returned
    /// token is a child of `parent`.
    pub async fn claim(
        &self,
        worker_id: &str,
        parent: &CancellationToken,
    ) -> Result<Option<ClaimedJob>, JobError> {
        loop {
            let Some(entry) = self.broker.pop().await? else {
                return Ok(None);
            };

            match self.store.claim_job(entry.job_id, worker_id).await? {
                Some(job) => {
                    let cancel = parent.child_token();
                    self.lock_active().insert(job.id, cancel.clone());
                    tracing::info!(job_id = %job.id, kind = %job.kind, worker_id, "Job claimed");
                    return Ok(Some(ClaimedJob { job, entry, cancel }));
                }
                None => {
                    tracing::debug!(job_id = %entry.job_id, "Skipping stale queue entry");
                    self.broker.ack(&entry).await?;
                }
            }
        }
    }

    /// Whether a running job should stop at this checkpoint.
    ///
    /// Looks at the in-process token first and then at the stored status,
    /// which covers cancels issued by another process.
    pub async fn should_stop(&self, job_id: Uuid, token: &CancellationToken) -> Result<bool, JobError> {
        if token.is_cancelled() {
            return Ok(true);
        }
        let status = self.get_status(job_id).await?.status;
        if status == JobStatus::Cancelled {
            token.cancel();
            return Ok(true);
        }
        Ok(false)
    }

    /// Persist and publish a stage boundary. Nothing is published once the
    /// job has left `running`, e.g. after a cancel from another process.
    pub async fn report_progress(&self, job_id: Uuid, stage: &str, progress: u8) -> Result<(), JobError> {
        if !self.store.update_progress(job_id, progress).await? {
            tracing::debug!(job_id = %job_id, stage, "Job not running, progress not published");
            return Ok(());
        }
        self.progress.publish(ProgressEvent::Progress {
            job_id,
            stage: stage.to_string(),
            progress,
        });
        Ok(())
    }

    /// Store the result of a claimed job. Returns `false` if the job was
    /// cancelled in the meantime and the result was discarded.
    pub async fn complete(&self, claimed: &ClaimedJob, result: JobResult) -> Result<bool, JobError> {
        let job_id = claimed.job.id;
        let stored = self.store.complete_job(job_id, &result).await?;
        if stored {
            self.progress.publish(ProgressEvent::Generated { job_id, result });
            metrics::counter!("creative_jobs_completed").increment(1);
            tracing::info!(job_id = %job_id, "Job completed");
        } else {
            tracing::info!(job_id = %job_id, "Job no longer running, result discarded");
        }
        self.release(claimed).await?;
        Ok(stored)
    }

    /// Record the terminal error of a claimed job.
    pub async fn fail(&self, claimed: &ClaimedJob, error: &str) -> Result<bool, JobError> {
        let job_id = claimed.job.id;
        let stored = self.store.fail_job(job_id, error).await?;
        if stored {
            self.progress.publish(ProgressEvent::Failed {
                job_id,
                error: error.to_string(),
            });
            metrics::counter!("creative_jobs_failed").increment(1);
            tracing::warn!(job_id = %job_id, error, "Job failed");
        }
        self.release(claimed).await?;
        Ok(stored)
    }

    /// Hand a claimed job back to the queue as pending.
    pub async fn requeue(&self, claimed: &ClaimedJob) -> Result<bool, JobError> {
        let job_id = claimed.job.id;
        let requeued = self.store.requeue_job(job_id).await?;
        self.release(claimed).await?;
        if requeued {
            self.broker.push(&claimed.entry).await?;
            tracing::info!(job_id = %job_id, "Job requeued");
        }
        Ok(requeued)
    }

    /// Drop the worker's hold on a job without touching its status.
    pub async fn release(&self, claimed: &ClaimedJob) -> Result<(), JobError> {
        self.lock_active().remove(&claimed.job.id);
        self.broker.ack(&claimed.entry).await?;
        Ok(())
    }

    /// Push every pending row back onto the broker.
    ///
    /// Used at worker start-up to recover ids lost by the broker; duplicate
    /// entries are harmless because claims are exclusive.
    pub async fn recover_pending(&self, limit: usize) -> Result<usize, JobError> {
        let ids = self.store.pending_job_ids(limit).await?;
        for job_id in &ids {
            let job = self.get_status(*job_id).await?;
            self.broker
                .push(&QueuedJob {
                    job_id: *job_id,
                    kind: job.kind,
                })
                .await?;
        }
        Ok(ids.len())
    }

    pub async fn queue_depth(&self) -> Result<u64, JobError> {
        let depth = self.broker.depth().await?;
        metrics::gauge!("creative_queue_depth").set(depth as f64);
        Ok(depth)
    }

    pub async fn store_health(&self) -> Result<(), JobError> {
        Ok(self.store.health_check().await?)
    }

    pub async fn broker_health(&self) -> Result<(), JobError> {
        Ok(self.broker.health_check().await?)
    }

    /// Drop the local hold on a job whose task was aborted before it could
    /// settle. The row and the broker entry are left as they are.
    pub fn forget(&self, job_id: Uuid) {
        self.lock_active().remove(&job_id);
    }

    /// Number of jobs currently held by workers of this process.
    pub fn active_count(&self) -> usize {
        self.lock_active().len()
    }

    fn active_token(&self, job_id: Uuid) -> Option<CancellationToken> {
        self.lock_active().get(&job_id).cloned()
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, CancellationToken>> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Broker(#[from] QueueError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::models::brand::{Brand, BrandIdentity};
    use crate::models::creative::CreativeFormat;
    use crate::models::template::{LayoutStyle, Template};
    use crate::services::queue::MemoryBroker;
    use chrono::Utc;

    struct Fixture {
        queue: JobQueue,
        store: Arc<MemoryStore>,
        broker: Arc<MemoryBroker>,
        brand_id: Uuid,
        template_id: Uuid,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let broker = Arc::new(MemoryBroker::new());
        let brand_id = Uuid::new_v4();
        let template_id = Uuid::new_v4();
        store
            .insert_brand(&Brand {
                id: brand_id,
                name: "Acme".to_string(),
                website: None,
                identity: BrandIdentity::default(),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .await
            .unwrap();
        store
            .insert_template(&Template {
                id: template_id,
                name: "Hero".to_string(),
                layout: LayoutStyle::HeroImage,
                formats: vec![CreativeFormat::Square],
            })
            .await
            .unwrap();
        let queue = JobQueue::new(
            store.clone(),
            store.clone(),
            broker.clone(),
            Arc::new(ProgressHub::new()),
        );
        Fixture {
            queue,
            store,
            broker,
            brand_id,
            template_id,
        }
    }

    fn payload(f: &Fixture) -> JobPayload {
        JobPayload {
            brand_id: Some(f.brand_id),
            template_id: Some(f.template_id),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_enqueue_creates_pending_job() {
        let f = fixture().await;
        let job = f
            .queue
            .enqueue(JobKind::SingleCreative, payload(&f))
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(f.queue.get_status(job.id).await.unwrap().status, JobStatus::Pending);
        assert_eq!(f.broker.depth().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_enqueue_without_template_creates_nothing() {
        let f = fixture().await;
        let mut p = payload(&f);
        p.template_id = None;
        let err = f.queue.enqueue(JobKind::SingleCreative, p).await.unwrap_err();
        assert!(matches!(err, JobError::Validation(_)));
        assert_eq!(f.broker.depth().await.unwrap(), 0);
        assert!(f.store.pending_job_ids(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_enqueue_unknown_brand_is_not_found() {
        let f = fixture().await;
        let mut p = payload(&f);
        p.brand_id = Some(Uuid::new_v4());
        let err = f.queue.enqueue(JobKind::SingleCreative, p).await.unwrap_err();
        assert!(matches!(err, JobError::NotFound { entity: "brand", .. }));
    }

    #[tokio::test]
    async fn test_get_status_unknown_job() {
        let f = fixture().await;
        let err = f.queue.get_status(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, JobError::NotFound { entity: "job", .. }));
    }

    #[tokio::test]
    async fn test_cancelled_while_queued_is_never_claimed() {
        let f = fixture().await;
        let job = f
            .queue
            .enqueue(JobKind::SingleCreative, payload(&f))
            .await
            .unwrap();
        let result = f.queue.cancel(job.id).await.unwrap();
        assert!(result.changed);

        let parent = CancellationToken::new();
        assert!(f.queue.claim("w1", &parent).await.unwrap().is_none());
        assert_eq!(f.broker.in_flight().await, 0);
    }

    #[tokio::test]
    async fn test_cancel_running_job_signals_token() {
        let f = fixture().await;
        let job = f
            .queue
            .enqueue(JobKind::SingleCreative, payload(&f))
            .await
            .unwrap();
        let parent = CancellationToken::new();
        let claimed = f.queue.claim("w1", &parent).await.unwrap().unwrap();
        assert!(!claimed.cancel.is_cancelled());

        f.queue.cancel(job.id).await.unwrap();
        assert!(claimed.cancel.is_cancelled());
        assert!(f.queue.should_stop(job.id, &claimed.cancel).await.unwrap());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_terminal_job_is_noop() {
        let f = fixture().await;
        let job = f
            .queue
            .enqueue(JobKind::SingleCreative, payload(&f))
            .await
            .unwrap();
        let claimed = f
            .queue
            .claim("w1", &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        f.queue.fail(&claimed, "provider down").await.unwrap();

        let result = f.queue.cancel(job.id).await.unwrap();
        assert!(!result.changed);
        assert_eq!(result.job.status, JobStatus::Failed);
        assert_eq!(result.job.error.as_deref(), Some("provider down"));
    }

    #[tokio::test]
    async fn test_should_stop_sees_cancel_from_store() {
        let f = fixture().await;
        let job = f
            .queue
            .enqueue(JobKind::SingleCreative, payload(&f))
            .await
            .unwrap();
        let claimed = f
            .queue
            .claim("w1", &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        // Cancel straight in the store, as another process would.
        f.store.cancel_job(job.id).await.unwrap();
        assert!(f.queue.should_stop(job.id, &claimed.cancel).await.unwrap());
        assert!(claimed.cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_progress_after_remote_cancel_is_not_published() {
        let f = fixture().await;
        let job = f
            .queue
            .enqueue(JobKind::SingleCreative, payload(&f))
            .await
            .unwrap();
        let _claimed = f
            .queue
            .claim("w1", &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        let mut sub = f.queue.progress().subscribe(job.id);

        f.queue.report_progress(job.id, "started", 5).await.unwrap();
        f.store.cancel_job(job.id).await.unwrap();
        f.queue.report_progress(job.id, "site-analysis", 20).await.unwrap();

        assert!(matches!(sub.try_recv(), Some(ProgressEvent::Progress { progress: 5, .. })));
        assert!(sub.try_recv().is_none());
        assert_eq!(f.queue.get_status(job.id).await.unwrap().progress, 5);
    }

    #[tokio::test]
    async fn test_requeue_puts_job_back() {
        let f = fixture().await;
        let job = f
            .queue
            .enqueue(JobKind::SingleCreative, payload(&f))
            .await
            .unwrap();
        let claimed = f
            .queue
            .claim("w1", &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        assert!(f.queue.requeue(&claimed).await.unwrap());
        assert_eq!(f.queue.get_status(job.id).await.unwrap().status, JobStatus::Pending);
        assert_eq!(f.broker.depth().await.unwrap(), 1);
        assert_eq!(f.queue.active_count(), 0);
    }

    #[tokio::test]
    async fn test_recover_pending_repushes_ids() {
        let f = fixture().await;
        f.queue
            .enqueue(JobKind::SingleCreative, payload(&f))
            .await
            .unwrap();
        f.broker.pop().await.unwrap();
        assert_eq!(f.queue.recover_pending(100).await.unwrap(), 1);
        assert_eq!(f.queue.queue_depth().await.unwrap(), 1);
    }
}
