use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use uuid::Uuid;

use crate::models::brand::{Brand, BrandIdentity};
use crate::models::creative::Creative;
use crate::models::job::{Job, JobResult};
use crate::models::template::Template;

pub mod catalog_queries;
pub mod memory;
pub mod queries;

/// Initialize PostgreSQL connection pool
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt row: {0}")]
    Decode(String),

    #[error("Constraint violated: {0}")]
    Constraint(String),
}

/// Outcome of a cancel request against the store.
#[derive(Debug, Clone, PartialEq)]
pub enum CancelOutcome {
    /// The job was pending or running and is now cancelled.
    Cancelled(Job),
    /// The job had already finished; nothing changed.
    AlreadyTerminal(Job),
}

/// Persistence for job rows.
///
/// Every transition is conditional on the current status so that only
/// the worker owning a job can move it forward, and a cancelled job can
/// never be resurrected by a late result.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert_job(&self, job: &Job) -> Result<(), StoreError>;

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, StoreError>;

    /// `pending → running`, recording the claiming worker. Returns `None`
    /// when the job is not pending anymore.
    async fn claim_job(&self, id: Uuid, worker_id: &str) -> Result<Option<Job>, StoreError>;

    /// Raise the stored percentage of a running job (never lowers it).
    /// Returns `false` when the job is not running anymore.
    async fn update_progress(&self, id: Uuid, progress: u8) -> Result<bool, StoreError>;

    /// `running → completed`. Returns `false` when the job was not running.
    async fn complete_job(&self, id: Uuid, result: &JobResult) -> Result<bool, StoreError>;

    /// `running → failed`. Returns `false` when the job was not running.
    async fn fail_job(&self, id: Uuid, error: &str) -> Result<bool, StoreError>;

    /// `pending | running → cancelled`. `None` when the job is unknown.
    async fn cancel_job(&self, id: Uuid) -> Result<Option<CancelOutcome>, StoreError>;

    /// `running → pending`, clearing the claim and progress.
    async fn requeue_job(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Pending job ids, oldest first.
    async fn pending_job_ids(&self, limit: usize) -> Result<Vec<Uuid>, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

/// Brands, templates and creatives the pipeline reads and writes.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn insert_brand(&self, brand: &Brand) -> Result<(), StoreError>;

    async fn get_brand(&self, id: Uuid) -> Result<Option<Brand>, StoreError>;

    async fn update_brand_identity(
        &self,
        id: Uuid,
        identity: &BrandIdentity,
    ) -> Result<bool, StoreError>;

    async fn insert_template(&self, template: &Template) -> Result<(), StoreError>;

    async fn get_template(&self, id: Uuid) -> Result<Option<Template>, StoreError>;

    async fn list_templates(&self) -> Result<Vec<Template>, StoreError>;

    async fn insert_creative(&self, creative: &Creative) -> Result<(), StoreError>;

    async fn get_creative(&self, id: Uuid) -> Result<Option<Creative>, StoreError>;

    async fn delete_creative(&self, id: Uuid) -> Result<bool, StoreError>;
}

/// PostgreSQL-backed store for jobs and catalog rows.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for PgStore {
    async fn insert_job(&self, job: &Job) -> Result<(), StoreError> {
        queries::insert_job(&self.pool, job).await
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        queries::get_job(&self.pool, id).await
    }

    async fn claim_job(&self, id: Uuid, worker_id: &str) -> Result<Option<Job>, StoreError> {
        queries::claim_job(&self.pool, id, worker_id).await
    }

    async fn update_progress(&self, id: Uuid, progress: u8) -> Result<bool, StoreError> {
        queries::update_progress(&self.pool, id, progress).await
    }

    async fn complete_job(&self, id: Uuid, result: &JobResult) -> Result<bool, StoreError> {
        queries::complete_job(&self.pool, id, result).await
    }

    async fn fail_job(&self, id: Uuid, error: &str) -> Result<bool, StoreError> {
        queries::fail_job(&self.pool, id, error).await
    }

    async fn cancel_job(&self, id: Uuid) -> Result<Option<CancelOutcome>, StoreError> {
        queries::cancel_job(&self.pool, id).await
    }

    async fn requeue_job(&self, id: Uuid) -> Result<bool, StoreError> {
        queries::requeue_job(&self.pool, id).await
    }

    async fn pending_job_ids(&self, limit: usize) -> Result<Vec<Uuid>, StoreError> {
        queries::get_pending_job_ids(&self.pool, limit as i64).await
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for PgStore {
    async fn insert_brand(&self, brand: &Brand) -> Result<(), StoreError> {
        catalog_queries::insert_brand(&self.pool, brand).await
    }

    async fn get_brand(&self, id: Uuid) -> Result<Option<Brand>, StoreError> {
        catalog_queries::get_brand(&self.pool, id).await
    }

    async fn update_brand_identity(
        &self,
        id: Uuid,
        identity: &BrandIdentity,
    ) -> Result<bool, StoreError> {
        catalog_queries::update_brand_identity(&self.pool, id, identity).await
    }

    async fn insert_template(&self, template: &Template) -> Result<(), StoreError> {
        catalog_queries::insert_template(&self.pool, template).await
    }

    async fn get_template(&self, id: Uuid) -> Result<Option<Template>, StoreError> {
        catalog_queries::get_template(&self.pool, id).await
    }

    async fn list_templates(&self) -> Result<Vec<Template>, StoreError> {
        catalog_queries::list_templates(&self.pool).await
    }

    async fn insert_creative(&self, creative: &Creative) -> Result<(), StoreError> {
        catalog_queries::insert_creative(&self.pool, creative).await
    }

    async fn get_creative(&self, id: Uuid) -> Result<Option<Creative>, StoreError> {
        catalog_queries::get_creative(&self.pool, id).await
    }

    async fn delete_creative(&self, id: Uuid) -> Result<bool, StoreError> {
        catalog_queries::delete_creative(&self.pool, id).await
    }
}
