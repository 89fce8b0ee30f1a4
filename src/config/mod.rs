use serde::Deserialize;
use std::time::Duration;

use crate::services::worker::{ShutdownPolicy, WorkerConfig};

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string for the job broker and progress relay
    pub redis_url: String,

    /// OpenAI-compatible base URL for copy generation
    #[serde(default = "default_api_base")]
    pub text_api_base: String,

    #[serde(default)]
    pub text_api_key: String,

    #[serde(default = "default_text_model")]
    pub text_model: String,

    /// OpenAI-compatible base URL for image generation
    #[serde(default = "default_api_base")]
    pub image_api_base: String,

    #[serde(default)]
    pub image_api_key: String,

    #[serde(default = "default_image_model")]
    pub image_model: String,

    /// Upper bound for every external call made by the pipeline
    #[serde(default = "default_provider_timeout_secs")]
    pub provider_timeout_secs: u64,

    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    #[serde(default = "default_poll_interval_ms")]
    pub worker_poll_interval_ms: u64,

    /// Run a worker pool inside the API process
    #[serde(default)]
    pub embedded_worker: bool,

    #[serde(default)]
    pub worker_id: Option<String>,

    /// drain | requeue | abandon
    #[serde(default)]
    pub shutdown_policy: ShutdownPolicy,

    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,

    /// S3-compatible bucket; assets go to `asset_dir` when unset
    #[serde(default)]
    pub s3_bucket: Option<String>,

    #[serde(default)]
    pub s3_endpoint: Option<String>,

    #[serde(default)]
    pub s3_access_key: Option<String>,

    #[serde(default)]
    pub s3_secret_key: Option<String>,

    #[serde(default)]
    pub s3_path_style: bool,

    #[serde(default = "default_asset_dir")]
    pub asset_dir: String,

    /// Public prefix for asset URLs
    #[serde(default = "default_asset_base_url")]
    pub asset_base_url: String,

    /// Redis pub/sub channel carrying progress events between processes
    #[serde(default = "default_progress_channel")]
    pub progress_channel: String,

    #[serde(default = "default_app_env")]
    pub app_env: String,
}

/// Connection settings for S3-compatible asset storage.
#[derive(Debug, Clone, PartialEq)]
pub struct S3Settings {
    pub bucket: String,
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub path_style: bool,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_text_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_image_model() -> String {
    "gpt-image-1".to_string()
}

fn default_provider_timeout_secs() -> u64 {
    60
}

fn default_worker_concurrency() -> usize {
    4
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

fn default_asset_dir() -> String {
    "./data/assets".to_string()
}

fn default_asset_base_url() -> String {
    "http://localhost:3000/assets".to_string()
}

fn default_progress_channel() -> String {
    "creative_engine:progress".to_string()
}

fn default_app_env() -> String {
    "development".to_string()
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    /// S3 settings, if every S3 variable is present.
    pub fn s3(&self) -> Option<S3Settings> {
        Some(S3Settings {
            bucket: self.s3_bucket.clone()?,
            endpoint: self.s3_endpoint.clone()?,
            access_key: self.s3_access_key.clone()?,
            secret_key: self.s3_secret_key.clone()?,
            path_style: self.s3_path_style,
        })
    }

    pub fn worker_config(&self, default_id: &str) -> WorkerConfig {
        WorkerConfig {
            worker_id: self
                .worker_id
                .clone()
                .unwrap_or_else(|| format!("{default_id}-{}", std::process::id())),
            concurrency: self.worker_concurrency.max(1),
            poll_interval: Duration::from_millis(self.worker_poll_interval_ms),
            shutdown_policy: self.shutdown_policy,
            shutdown_grace: Duration::from_secs(self.shutdown_grace_secs),
        }
    }
}
