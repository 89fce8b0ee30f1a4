use async_trait::async_trait;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::job::JobKind;

const QUEUE_KEY: &str = "creative_engine:jobs";
const PROCESSING_KEY: &str = "creative_engine:processing";

/// Broker entry; the job row itself lives in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedJob {
    pub job_id: Uuid,
    pub kind: JobKind,
}

/// Transport carrying job ids from producers to workers.
///
/// `pop` hands an entry to exactly one caller and parks it on a
/// processing list until `ack`.
#[async_trait]
pub trait JobBroker: Send + Sync {
    async fn push(&self, job: &QueuedJob) -> Result<(), QueueError>;

    async fn pop(&self) -> Result<Option<QueuedJob>, QueueError>;

    async fn ack(&self, job: &QueuedJob) -> Result<(), QueueError>;

    async fn depth(&self) -> Result<u64, QueueError>;

    async fn health_check(&self) -> Result<(), QueueError>;
}

/// Redis-backed job broker.
pub struct RedisBroker {
    client: redis::Client,
}

impl RedisBroker {
    pub fn new(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self { client })
    }

    pub fn client(&self) -> &redis::Client {
        &self.client
    }
}

#[async_trait]
impl JobBroker for RedisBroker {
    /// Enqueue a job id.
    async fn push(&self, job: &QueuedJob) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(job)?;
        conn.lpush::<_, _, ()>(QUEUE_KEY, &payload).await?;
        Ok(())
    }

    /// Dequeue the oldest entry, moving it to the processing list atomically.
    async fn pop(&self) -> Result<Option<QueuedJob>, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let result: Option<String> = conn.rpoplpush(QUEUE_KEY, PROCESSING_KEY).await?;

        match result {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    /// Remove an entry from the processing list.
    async fn ack(&self, job: &QueuedJob) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(job)?;
        conn.lrem::<_, _, ()>(PROCESSING_KEY, 1, &payload).await?;
        Ok(())
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let depth: u64 = conn.llen(QUEUE_KEY).await?;
        Ok(depth)
    }

    /// Check Redis connectivity (for health checks).
    async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

/// Single-process broker with the same pop/ack contract.
#[derive(Default)]
pub struct MemoryBroker {
    pending: Mutex<VecDeque<QueuedJob>>,
    processing: Mutex<Vec<QueuedJob>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn in_flight(&self) -> usize {
        self.processing.lock().await.len()
    }
}

#[async_trait]
impl JobBroker for MemoryBroker {
    async fn push(&self, job: &QueuedJob) -> Result<(), QueueError> {
        self.pending.lock().await.push_back(job.clone());
        Ok(())
    }

    async fn pop(&self) -> Result<Option<QueuedJob>, QueueError> {
        let next = self.pending.lock().await.pop_front();
        if let Some(job) = &next {
            self.processing.lock().await.push(job.clone());
        }
        Ok(next)
    }

    async fn ack(&self, job: &QueuedJob) -> Result<(), QueueError> {
        let mut processing = self.processing.lock().await;
        if let Some(pos) = processing.iter().position(|j| j == job) {
            processing.remove(pos);
        }
        Ok(())
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        Ok(self.pending.lock().await.len() as u64)
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
