use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::brand::BrandIdentity;
use crate::models::job::{Job, JobKind, JobPayload, JobResult, JobStatus};

/// Body of `POST /api/v1/creatives`.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateCreativeRequest {
    /// `single-creative` (default) or `multi-creative`.
    #[garde(skip)]
    pub kind: Option<JobKind>,

    #[serde(flatten)]
    #[garde(dive)]
    pub payload: JobPayload,
}

/// Body of `POST /api/v1/creative-generator/generate-campaign`.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GenerateCampaignRequest {
    #[serde(flatten)]
    #[garde(dive)]
    pub payload: JobPayload,
}

/// Body of `POST /api/v1/brands`.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateBrandRequest {
    #[garde(length(min = 1, max = 200))]
    pub name: String,

    #[garde(length(min = 1, max = 2048))]
    pub website: Option<String>,

    #[serde(default)]
    #[garde(dive)]
    pub identity: BrandIdentity,
}

/// Response after a job has been accepted.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    /// Progress channel to subscribe to, `job:<id>`.
    pub channel: String,
}

/// Response for job polling.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub kind: JobKind,
    pub status: JobStatus,
    pub progress: u8,
    pub result: Option<JobResult>,
    pub error: Option<String>,
}

impl From<Job> for JobStatusResponse {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id,
            kind: job.kind,
            status: job.status,
            progress: job.progress,
            result: job.result,
            error: job.error,
        }
    }
}

pub fn channel_name(job_id: Uuid) -> String {
    format!("job:{job_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_creative_request_flattens_payload() {
        let brand = Uuid::new_v4();
        let req: CreateCreativeRequest = serde_json::from_value(serde_json::json!({
            "kind": "multi-creative",
            "brandId": brand,
            "templateId": Uuid::new_v4(),
            "variations": 3,
        }))
        .unwrap();
        assert_eq!(req.kind, Some(JobKind::MultiCreative));
        assert_eq!(req.payload.brand_id, Some(brand));
        assert_eq!(req.payload.variations, 3);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_brand_request_rejects_empty_name() {
        let req: CreateBrandRequest = serde_json::from_value(serde_json::json!({
            "name": "",
        }))
        .unwrap();
        assert!(req.validate().is_err());
    }
}
