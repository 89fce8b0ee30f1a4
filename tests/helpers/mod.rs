//! Shared fixtures: in-memory store and broker, a temp asset directory
//! and scriptable fake providers.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use creative_engine::db::memory::MemoryStore;
use creative_engine::db::{CatalogStore, JobStore};
use creative_engine::models::brand::{Brand, BrandIdentity};
use creative_engine::models::creative::{CreativeCopy, CreativeFormat};
use creative_engine::models::job::{Job, JobStatus};
use creative_engine::models::template::{LayoutStyle, Template};
use creative_engine::services::jobs::JobQueue;
use creative_engine::services::pipeline::Pipeline;
use creative_engine::services::progress::ProgressHub;
use creative_engine::services::providers::{
    CopyRequest, GeneratedImage, ImageGenerator, ImageRequest, ProviderError, TextGenerator,
};
use creative_engine::services::queue::MemoryBroker;
use creative_engine::services::site_analysis::SiteFetcher;
use creative_engine::services::storage::LocalAssetStore;

pub const BRAND_PAGE: &str = r##"
<html>
  <head>
    <title>Acme Rockets</title>
    <meta name="description" content="Rockets delivered fast.">
    <meta name="theme-color" content="#0d47a1">
    <style>body { font-family: Inter, sans-serif; } .cta { background: #ff6f00; }</style>
  </head>
  <body><h1>Fly further</h1></body>
</html>
"##;

/// Small PNG standing in for a generated photo.
pub fn png_bytes() -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(64, 64, image::Rgba([30, 160, 90, 255]));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, image::ImageFormat::Png)
        .expect("encode png");
    buf.into_inner()
}

/// Copy generator returning numbered, distinct variants.
#[derive(Default)]
pub struct FakeText {
    pub calls: AtomicUsize,
}

#[async_trait]
impl TextGenerator for FakeText {
    async fn generate_copy(&self, request: &CopyRequest) -> Result<Vec<CreativeCopy>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let angles = ["Fly further", "Built for speed", "Launch day deals", "Zero to orbit"];
        Ok((0..request.count)
            .map(|i| CreativeCopy {
                headline: format!("{} {}", angles[i % angles.len()], request.brand_name),
                primary_text: "Rockets delivered to your launch pad in record time.".to_string(),
                description: "Free shipping".to_string(),
                call_to_action: "SHOP_NOW".to_string(),
            })
            .collect())
    }
}

/// Copy generator that panics, to exercise worker panic handling.
pub struct PanickingText;

#[async_trait]
impl TextGenerator for PanickingText {
    async fn generate_copy(&self, _request: &CopyRequest) -> Result<Vec<CreativeCopy>, ProviderError> {
        panic!("copy model exploded");
    }
}

/// Image generator with per-variation failures, a delay, and a record of
/// how many calls ran at once.
pub struct FakeImages {
    pub failing: HashSet<usize>,
    /// Variations answered with a PNG cut short: accepted by the provider
    /// layer, rejected when decoded for rendering.
    pub truncated: HashSet<usize>,
    pub delay: Duration,
    pub calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl FakeImages {
    pub fn ok() -> Self {
        Self::with(HashSet::new(), Duration::ZERO)
    }

    pub fn failing(variations: &[usize]) -> Self {
        Self::with(variations.iter().copied().collect(), Duration::ZERO)
    }

    pub fn slow(delay: Duration) -> Self {
        Self::with(HashSet::new(), delay)
    }

    pub fn truncated(variations: &[usize]) -> Self {
        Self {
            truncated: variations.iter().copied().collect(),
            ..Self::ok()
        }
    }

    fn with(failing: HashSet<usize>, delay: Duration) -> Self {
        Self {
            failing,
            truncated: HashSet::new(),
            delay,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ImageGenerator for FakeImages {
    async fn generate_image(&self, request: &ImageRequest) -> Result<GeneratedImage, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.contains(&request.variation) {
            return Err(ProviderError::InvalidResponse(format!(
                "variation {} rejected",
                request.variation
            )));
        }
        let mut bytes = png_bytes();
        if self.truncated.contains(&request.variation) {
            bytes.truncate(40);
        }
        GeneratedImage::from_bytes(bytes)
    }
}

pub struct FakeSite;

#[async_trait]
impl SiteFetcher for FakeSite {
    async fn fetch_html(&self, _url: &str) -> Result<String, ProviderError> {
        Ok(BRAND_PAGE.to_string())
    }
}

pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub broker: Arc<MemoryBroker>,
    pub queue: Arc<JobQueue>,
    pub pipeline: Arc<Pipeline>,
    pub assets: Arc<LocalAssetStore>,
    pub asset_root: PathBuf,
    pub brand_id: Uuid,
    pub templates: Vec<Uuid>,
}

impl Drop for Fixture {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.asset_root);
    }
}

pub async fn fixture() -> Fixture {
    fixture_with(Arc::new(FakeText::default()), Arc::new(FakeImages::ok())).await
}

pub async fn fixture_with(text: Arc<dyn TextGenerator>, images: Arc<dyn ImageGenerator>) -> Fixture {
    fixture_full(text, images, Duration::from_secs(5)).await
}

pub async fn fixture_full(
    text: Arc<dyn TextGenerator>,
    images: Arc<dyn ImageGenerator>,
    call_timeout: Duration,
) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let broker = Arc::new(MemoryBroker::new());
    let asset_root = std::env::temp_dir().join(format!("creative-engine-test-{}", Uuid::new_v4()));
    let assets = Arc::new(LocalAssetStore::new(&asset_root, "http://assets.test"));

    let brand_id = Uuid::new_v4();
    store
        .insert_brand(&Brand {
            id: brand_id,
            name: "Acme".to_string(),
            website: Some("https://acme.test".to_string()),
            identity: BrandIdentity {
                primary_color: Some("#0d47a1".to_string()),
                ..Default::default()
            },
            created_at: Utc::now(),
            updated_at: Utc::now(),
        })
        .await
        .expect("insert brand");

    let mut templates = Vec::new();
    for (name, layout, formats) in [
        (
            "Hero",
            LayoutStyle::HeroImage,
            vec![CreativeFormat::Landscape, CreativeFormat::Square, CreativeFormat::Story],
        ),
        (
            "Split",
            LayoutStyle::SplitPanel,
            vec![CreativeFormat::Landscape, CreativeFormat::Square],
        ),
        (
            "Overlay",
            LayoutStyle::TextOverlay,
            vec![CreativeFormat::Square, CreativeFormat::Story],
        ),
    ] {
        let template = Template {
            id: Uuid::new_v4(),
            name: name.to_string(),
            layout,
            formats,
        };
        store.insert_template(&template).await.expect("insert template");
        templates.push(template.id);
    }

    let queue = Arc::new(JobQueue::new(
        store.clone(),
        store.clone(),
        broker.clone(),
        Arc::new(ProgressHub::new()),
    ));
    let pipeline = Arc::new(Pipeline::new(
        store.clone(),
        Arc::new(FakeSite),
        text,
        images,
        assets.clone(),
        call_timeout,
    ));

    Fixture {
        store,
        broker,
        queue,
        pipeline,
        assets,
        asset_root,
        brand_id,
        templates,
    }
}

/// Number of files below `dir`, recursively. A missing directory counts as empty.
pub fn files_under(dir: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| {
            let path = entry.path();
            if path.is_dir() {
                files_under(&path)
            } else {
                1
            }
        })
        .sum()
}

/// Poll until the job reaches `status` or the deadline passes.
pub async fn wait_for_status(store: &MemoryStore, job_id: Uuid, status: JobStatus) -> Job {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let job = store
            .get_job(job_id)
            .await
            .expect("get job")
            .expect("job exists");
        if job.status == status {
            return job;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {job_id} stuck in {} waiting for {status}",
            job.status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll until the job's stored progress reaches `at_least`.
pub async fn wait_for_progress(store: &MemoryStore, job_id: Uuid, at_least: u8) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let job = store
            .get_job(job_id)
            .await
            .expect("get job")
            .expect("job exists");
        if job.progress >= at_least {
            return;
        }
        assert!(tokio::time::Instant::now() < deadline, "progress stuck at {}", job.progress);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
