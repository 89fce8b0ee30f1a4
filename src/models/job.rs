use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::models::brand::BrandIdentity;
use crate::models::creative::{CreativeFormat, RenderedAsset};

/// What a queued job asks the pipeline to produce.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum JobKind {
    SingleCreative,
    MultiCreative,
    FullCampaign,
    DataSync,
}

/// Lifecycle of a job: `pending → running → completed | failed | cancelled`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

fn default_variations() -> u8 {
    1
}

/// Brand/template/content references carried by a job.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobPayload {
    #[garde(skip)]
    pub brand_id: Option<Uuid>,

    #[garde(skip)]
    pub template_id: Option<Uuid>,

    /// Templates for a full campaign; one creative per entry.
    #[serde(default)]
    #[garde(length(max = 12))]
    pub template_ids: Vec<Uuid>,

    /// Free-form creative brief forwarded to the copy and image prompts.
    #[garde(length(max = 2000))]
    pub prompt: Option<String>,

    /// Number of image variations (and copy variants for multi-creative jobs).
    #[serde(default = "default_variations")]
    #[garde(range(min = 1, max = 4))]
    pub variations: u8,

    /// Formats to render; empty means every format the template supports.
    #[serde(default)]
    #[garde(length(max = 3))]
    pub formats: Vec<CreativeFormat>,
}

impl Default for JobPayload {
    fn default() -> Self {
        Self {
            brand_id: None,
            template_id: None,
            template_ids: Vec::new(),
            prompt: None,
            variations: default_variations(),
            formats: Vec::new(),
        }
    }
}

impl JobPayload {
    /// Check the references a job of `kind` cannot run without.
    ///
    /// Field ranges are covered by `garde`; this only looks at which
    /// references are present.
    pub fn missing_references(&self, kind: JobKind) -> Option<&'static str> {
        if self.brand_id.is_none() {
            return Some("brandId is required");
        }
        match kind {
            JobKind::SingleCreative | JobKind::MultiCreative if self.template_id.is_none() => {
                Some("templateId is required")
            }
            JobKind::FullCampaign if self.template_id.is_none() && self.template_ids.is_empty() => {
                Some("templateId or templateIds is required")
            }
            _ => None,
        }
    }

    /// Templates this job renders, in order and without duplicates.
    pub fn templates(&self) -> Vec<Uuid> {
        let mut ids = Vec::with_capacity(self.template_ids.len() + 1);
        for id in self.template_id.iter().chain(self.template_ids.iter()) {
            if !ids.contains(id) {
                ids.push(*id);
            }
        }
        ids
    }
}

/// One creative produced by a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreativeOutput {
    pub creative_id: Uuid,
    pub template_id: Uuid,
    pub headline: String,
    pub assets: std::collections::BTreeMap<CreativeFormat, RenderedAsset>,
    pub validation_score: f64,
}

/// Artifact reference stored on a completed job.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    #[serde(default)]
    pub creatives: Vec<CreativeOutput>,

    /// Union of the formats rendered across all creatives.
    #[serde(default)]
    pub formats: Vec<CreativeFormat>,

    /// Image variations that came back from the provider.
    #[serde(default)]
    pub image_variations: usize,

    /// Refreshed identity for data-sync jobs.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub brand_identity: Option<BrandIdentity>,
}

/// A unit of asynchronous work tracked by the queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: Uuid,
    pub kind: JobKind,
    pub status: JobStatus,
    pub payload: JobPayload,
    pub progress: u8,
    pub result: Option<JobResult>,
    pub error: Option<String>,
    pub claimed_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(kind: JobKind, payload: JobPayload) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind,
            status: JobStatus::Pending,
            payload,
            progress: 0,
            result: None,
            error: None,
            claimed_by: None,
            created_at: now,
            updated_at: now,
        }
    }
}
