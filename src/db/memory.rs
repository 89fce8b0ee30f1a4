//! In-process store with the same transition rules as the Postgres store.
//!
//! Used by the test suite and by single-process runs without a database.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::db::{CancelOutcome, CatalogStore, JobStore, StoreError};
use crate::models::brand::{Brand, BrandIdentity};
use crate::models::creative::Creative;
use crate::models::job::{Job, JobResult, JobStatus};
use crate::models::template::Template;

#[derive(Default)]
pub struct MemoryStore {
    jobs: Mutex<HashMap<Uuid, Job>>,
    brands: Mutex<HashMap<Uuid, Brand>>,
    templates: Mutex<HashMap<Uuid, Template>>,
    creatives: Mutex<HashMap<Uuid, Creative>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creatives produced by a given job.
    pub async fn creatives_for_job(&self, job_id: Uuid) -> Vec<Creative> {
        self.creatives
            .lock()
            .await
            .values()
            .filter(|c| c.job_id == Some(job_id))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn insert_job(&self, job: &Job) -> Result<(), StoreError> {
        self.jobs.lock().await.insert(job.id, job.clone());
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.lock().await.get(&id).cloned())
    }

    async fn claim_job(&self, id: Uuid, worker_id: &str) -> Result<Option<Job>, StoreError> {
        let mut jobs = self.jobs.lock().await;
        match jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Pending => {
                job.status = JobStatus::Running;
                job.claimed_by = Some(worker_id.to_string());
                job.updated_at = Utc::now();
                Ok(Some(job.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn update_progress(&self, id: Uuid, progress: u8) -> Result<bool, StoreError> {
        let mut jobs = self.jobs.lock().await;
        match jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Running => {
                job.progress = job.progress.max(progress.min(100));
                job.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete_job(&self, id: Uuid, result: &JobResult) -> Result<bool, StoreError> {
        let mut jobs = self.jobs.lock().await;
        match jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Running => {
                job.status = JobStatus::Completed;
                job.result = Some(result.clone());
                job.error = None;
                job.progress = 100;
                job.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn fail_job(&self, id: Uuid, error: &str) -> Result<bool, StoreError> {
        let mut jobs = self.jobs.lock().await;
        match jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Running => {
                job.status = JobStatus::Failed;
                job.error = Some(error.to_string());
                job.result = None;
                job.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn cancel_job(&self, id: Uuid) -> Result<Option<CancelOutcome>, StoreError> {
        let mut jobs = self.jobs.lock().await;
        Ok(jobs.get_mut(&id).map(|job| {
            if job.status.is_terminal() {
                CancelOutcome::AlreadyTerminal(job.clone())
            } else {
                job.status = JobStatus::Cancelled;
                job.updated_at = Utc::now();
                CancelOutcome::Cancelled(job.clone())
            }
        }))
    }

    async fn requeue_job(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut jobs = self.jobs.lock().await;
        match jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Running => {
                job.status = JobStatus::Pending;
                job.claimed_by = None;
                job.progress = 0;
                job.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn pending_job_ids(&self, limit: usize) -> Result<Vec<Uuid>, StoreError> {
        let jobs = self.jobs.lock().await;
        let mut pending: Vec<&Job> = jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .collect();
        pending.sort_by_key(|j| j.created_at);
        Ok(pending.into_iter().take(limit).map(|j| j.id).collect())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn insert_brand(&self, brand: &Brand) -> Result<(), StoreError> {
        self.brands.lock().await.insert(brand.id, brand.clone());
        Ok(())
    }

    async fn get_brand(&self, id: Uuid) -> Result<Option<Brand>, StoreError> {
        Ok(self.brands.lock().await.get(&id).cloned())
    }

    async fn update_brand_identity(
        &self,
        id: Uuid,
        identity: &BrandIdentity,
    ) -> Result<bool, StoreError> {
        let mut brands = self.brands.lock().await;
        Ok(match brands.get_mut(&id) {
            Some(brand) => {
                brand.identity = identity.clone();
                brand.updated_at = Utc::now();
                true
            }
            None => false,
        })
    }

    async fn insert_template(&self, template: &Template) -> Result<(), StoreError> {
        self.templates
            .lock()
            .await
            .insert(template.id, template.clone());
        Ok(())
    }

    async fn get_template(&self, id: Uuid) -> Result<Option<Template>, StoreError> {
        Ok(self.templates.lock().await.get(&id).cloned())
    }

    async fn list_templates(&self) -> Result<Vec<Template>, StoreError> {
        let mut templates: Vec<Template> = self.templates.lock().await.values().cloned().collect();
        templates.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(templates)
    }

    async fn insert_creative(&self, creative: &Creative) -> Result<(), StoreError> {
        // Mirror the foreign keys of the relational schema.
        if !self.brands.lock().await.contains_key(&creative.brand_id) {
            return Err(StoreError::Constraint(format!(
                "creative references unknown brand {}",
                creative.brand_id
            )));
        }
        if !self.templates.lock().await.contains_key(&creative.template_id) {
            return Err(StoreError::Constraint(format!(
                "creative references unknown template {}",
                creative.template_id
            )));
        }
        self.creatives
            .lock()
            .await
            .insert(creative.id, creative.clone());
        Ok(())
    }

    async fn get_creative(&self, id: Uuid) -> Result<Option<Creative>, StoreError> {
        Ok(self.creatives.lock().await.get(&id).cloned())
    }

    async fn delete_creative(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.creatives.lock().await.remove(&id).is_some())
    }
}
