//! Generation pipeline: site analysis → copy → images → composition → render.
//!
//! Stages run strictly in order for one job. Before each stage the job's
//! cancellation token and stored status are checked; a cancelled job stops
//! there and its partial work is dropped. Creative rows are only written
//! after every creative of the job has rendered, and uploaded files of a
//! job that stops during render are deleted. Every provider call is bounded by
//! the configured timeout and also aborts as soon as the job is cancelled.

use futures::future::join_all;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use strum::{Display, EnumString};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::db::{CatalogStore, StoreError};
use crate::models::brand::{Brand, BrandIdentity};
use crate::models::creative::{
    Creative, CreativeAssets, CreativeCopy, CreativeFormat, CreativeStatus, RenderedAsset,
};
use crate::models::job::{CreativeOutput, JobKind, JobPayload, JobResult};
use crate::models::template::Template;
use crate::services::composition::{compose, CompositionPlan};
use crate::services::jobs::{ClaimedJob, JobError, JobQueue};
use crate::services::providers::{
    CopyRequest, GeneratedImage, ImageGenerator, ImageRequest, ProviderError, TextGenerator,
};
use crate::services::render::{self, RenderError};
use crate::services::scoring::{self, Rgb};
use crate::services::site_analysis::{analyze_html, SiteFetcher, SiteInsights};
use crate::services::storage::{asset_key, AssetStore, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum Stage {
    Started,
    SiteAnalysis,
    TextGeneration,
    ImageGeneration,
    Composition,
    Render,
}

impl Stage {
    /// Percentage reported once the stage is done.
    pub fn progress(self) -> u8 {
        match self {
            Self::Started => 5,
            Self::SiteAnalysis => 20,
            Self::TextGeneration => 40,
            Self::ImageGeneration => 70,
            Self::Composition => 80,
            Self::Render => 95,
        }
    }
}

pub struct Pipeline {
    catalog: Arc<dyn CatalogStore>,
    site: Arc<dyn SiteFetcher>,
    text: Arc<dyn TextGenerator>,
    images: Arc<dyn ImageGenerator>,
    assets: Arc<dyn AssetStore>,
    call_timeout: Duration,
}

/// One creative waiting to be rendered.
struct PlannedCreative {
    template: Template,
    image: usize,
    plan: CompositionPlan,
}

impl Pipeline {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        site: Arc<dyn SiteFetcher>,
        text: Arc<dyn TextGenerator>,
        images: Arc<dyn ImageGenerator>,
        assets: Arc<dyn AssetStore>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            catalog,
            site,
            text,
            images,
            assets,
            call_timeout,
        }
    }

    /// Run a claimed job to its result.
    pub async fn run(&self, queue: &JobQueue, claimed: &ClaimedJob) -> Result<JobResult, PipelineError> {
        let job = &claimed.job;
        let payload = &job.payload;
        let token = &claimed.cancel;

        self.checkpoint(queue, claimed).await?;
        self.advance(queue, job.id, Stage::Started).await?;

        let brand_id = payload.brand_id.ok_or(PipelineError::MissingBrand)?;
        let brand = self
            .catalog
            .get_brand(brand_id)
            .await?
            .ok_or(PipelineError::NotFound {
                entity: "brand",
                id: brand_id,
            })?;

        // site-analysis
        let started = Instant::now();
        let insights = self.analyze_site(&brand, token).await?;
        record_stage(Stage::SiteAnalysis, started);

        if job.kind == JobKind::DataSync {
            let identity = insights.to_identity().merged_with(&brand.identity);
            self.catalog.update_brand_identity(brand.id, &identity).await?;
            self.advance(queue, job.id, Stage::SiteAnalysis).await?;
            tracing::info!(job_id = %job.id, brand_id = %brand.id, "Brand identity refreshed");
            return Ok(JobResult {
                brand_identity: Some(identity),
                ..Default::default()
            });
        }
        let identity = brand.identity.merged_with(&insights.to_identity());
        self.advance(queue, job.id, Stage::SiteAnalysis).await?;

        let templates = self.load_templates(payload).await?;

        // text-generation
        self.checkpoint(queue, claimed).await?;
        let started = Instant::now();
        let copies = self
            .generate_copy(&brand, &identity, &insights, payload, job.kind, templates.len(), token)
            .await?;
        record_stage(Stage::TextGeneration, started);
        tracing::info!(job_id = %job.id, variants = copies.len(), "Copy generated");
        self.advance(queue, job.id, Stage::TextGeneration).await?;

        // image-generation
        self.checkpoint(queue, claimed).await?;
        let started = Instant::now();
        let primary_format = templates
            .first()
            .and_then(|t| t.formats_for(&payload.formats).first().copied())
            .unwrap_or(CreativeFormat::Square);
        let images = self
            .generate_images(job.id, &brand, &insights, &copies[0], payload, primary_format, token)
            .await?;
        record_stage(Stage::ImageGeneration, started);
        self.advance(queue, job.id, Stage::ImageGeneration).await?;

        // composition
        self.checkpoint(queue, claimed).await?;
        let started = Instant::now();
        let planned = plan_creatives(job.kind, &templates, &identity, &copies, images.len(), payload)?;
        record_stage(Stage::Composition, started);
        self.advance(queue, job.id, Stage::Composition).await?;

        // render
        self.checkpoint(queue, claimed).await?;
        let started = Instant::now();
        let mut uploaded = Vec::new();
        let rendered = match self
            .render_creatives(queue, claimed, brand.id, &planned, &images, &mut uploaded)
            .await
        {
            Ok(rendered) => rendered,
            Err(e) => {
                self.remove_assets(job.id, &uploaded).await;
                return Err(e);
            }
        };
        record_stage(Stage::Render, started);
        // Rows are written only once every creative of the job rendered.
        let stored = async {
            self.advance(queue, job.id, Stage::Render).await?;
            self.persist(&rendered).await
        }
        .await;
        if let Err(e) = stored {
            self.remove_assets(job.id, &uploaded).await;
            return Err(e);
        }
        let creatives: Vec<CreativeOutput> = rendered.into_iter().map(|(_, output)| output).collect();

        let mut formats: Vec<CreativeFormat> = creatives
            .iter()
            .flat_map(|c| c.assets.keys().copied())
            .collect();
        formats.sort();
        formats.dedup();

        Ok(JobResult {
            creatives,
            formats,
            image_variations: images.len(),
            brand_identity: None,
        })
    }

    async fn checkpoint(&self, queue: &JobQueue, claimed: &ClaimedJob) -> Result<(), PipelineError> {
        if queue.should_stop(claimed.job.id, &claimed.cancel).await? {
            tracing::info!(job_id = %claimed.job.id, "Job stopped at stage boundary");
            return Err(PipelineError::Cancelled);
        }
        Ok(())
    }

    async fn advance(&self, queue: &JobQueue, job_id: Uuid, stage: Stage) -> Result<(), PipelineError> {
        queue
            .report_progress(job_id, &stage.to_string(), stage.progress())
            .await?;
        Ok(())
    }

    /// Bound a provider call by the timeout and the job's cancellation.
    async fn call<T, F>(&self, token: &CancellationToken, fut: F) -> Result<T, PipelineError>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        tokio::select! {
            _ = token.cancelled() => Err(PipelineError::Cancelled),
            res = tokio::time::timeout(self.call_timeout, fut) => match res {
                Ok(inner) => inner.map_err(PipelineError::Provider),
                Err(_) => Err(PipelineError::Provider(ProviderError::Timeout(self.call_timeout))),
            },
        }
    }

    async fn analyze_site(&self, brand: &Brand, token: &CancellationToken) -> Result<SiteInsights, PipelineError> {
        let Some(website) = brand.website.as_deref() else {
            return Ok(SiteInsights::from_identity(brand));
        };
        let html = self.call(token, self.site.fetch_html(website)).await?;
        let mut insights = analyze_html(&html);
        if insights.title.is_none() {
            insights.title = Some(brand.name.clone());
        }
        Ok(insights)
    }

    async fn load_templates(&self, payload: &JobPayload) -> Result<Vec<Template>, PipelineError> {
        let mut templates = Vec::new();
        for id in payload.templates() {
            let template = self
                .catalog
                .get_template(id)
                .await?
                .ok_or(PipelineError::NotFound {
                    entity: "template",
                    id,
                })?;
            templates.push(template);
        }
        Ok(templates)
    }

    #[allow(clippy::too_many_arguments)]
    async fn generate_copy(
        &self,
        brand: &Brand,
        identity: &BrandIdentity,
        insights: &SiteInsights,
        payload: &JobPayload,
        kind: JobKind,
        template_count: usize,
        token: &CancellationToken,
    ) -> Result<Vec<CreativeCopy>, PipelineError> {
        let count = match kind {
            JobKind::MultiCreative => usize::from(payload.variations),
            JobKind::FullCampaign => template_count.max(1),
            _ => 1,
        };
        let request = CopyRequest {
            brand_name: brand.name.clone(),
            brand_description: identity.description.clone(),
            site_summary: insights.summary(),
            brief: payload.prompt.clone(),
            count,
        };
        let variants = self.call(token, self.text.generate_copy(&request)).await?;
        let copies = scoring::dedupe_variants(variants.into_iter().map(scoring::fit_copy).collect());
        if copies.is_empty() {
            return Err(PipelineError::NoCopy);
        }
        Ok(copies)
    }

    /// Request `variations` images as independent calls and keep the ones
    /// that succeed.
    #[allow(clippy::too_many_arguments)]
    async fn generate_images(
        &self,
        job_id: Uuid,
        brand: &Brand,
        insights: &SiteInsights,
        copy: &CreativeCopy,
        payload: &JobPayload,
        format: CreativeFormat,
        token: &CancellationToken,
    ) -> Result<Vec<GeneratedImage>, PipelineError> {
        let prompt = image_prompt(brand, insights, copy, payload.prompt.as_deref());
        let requests: Vec<ImageRequest> = (0..usize::from(payload.variations))
            .map(|variation| ImageRequest {
                prompt: prompt.clone(),
                size: format.provider_size().to_string(),
                variation,
            })
            .collect();

        let calls = requests
            .iter()
            .map(|request| self.call(token, self.images.generate_image(request)));
        let results = join_all(calls).await;

        let mut images = Vec::with_capacity(results.len());
        let mut last_error = None;
        for (variation, result) in results.into_iter().enumerate() {
            match result {
                Ok(image) => images.push(image),
                Err(PipelineError::Cancelled) => return Err(PipelineError::Cancelled),
                Err(e) => {
                    tracing::warn!(job_id = %job_id, variation, error = %e, "Image variation failed");
                    last_error = Some(e.to_string());
                }
            }
        }

        if images.is_empty() {
            return Err(PipelineError::NoImages(
                last_error.unwrap_or_else(|| "no variations requested".to_string()),
            ));
        }
        tracing::info!(
            job_id = %job_id,
            requested = requests.len(),
            generated = images.len(),
            "Images generated"
        );
        Ok(images)
    }

    /// Render and upload every planned creative. Keys are recorded in
    /// `uploaded` as they are written so a failed job can remove them.
    async fn render_creatives(
        &self,
        queue: &JobQueue,
        claimed: &ClaimedJob,
        brand_id: Uuid,
        planned: &[PlannedCreative],
        images: &[GeneratedImage],
        uploaded: &mut Vec<String>,
    ) -> Result<Vec<(Creative, CreativeOutput)>, PipelineError> {
        let mut rendered = Vec::with_capacity(planned.len());
        for item in planned {
            self.checkpoint(queue, claimed).await?;
            let creative = self
                .render_creative(claimed.job.id, brand_id, item, &images[item.image], uploaded)
                .await?;
            rendered.push(creative);
        }
        Ok(rendered)
    }

    /// Insert the rendered creatives; on failure the rows written so far
    /// are deleted again.
    async fn persist(&self, rendered: &[(Creative, CreativeOutput)]) -> Result<(), PipelineError> {
        for (i, (creative, _)) in rendered.iter().enumerate() {
            if let Err(e) = self.catalog.insert_creative(creative).await {
                for (written, _) in &rendered[..i] {
                    if let Err(e) = self.catalog.delete_creative(written.id).await {
                        tracing::warn!(creative_id = %written.id, error = %e, "Failed to roll back creative");
                    }
                }
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// Remove the rows and files of creatives whose job result was thrown
    /// away, e.g. because the job was cancelled while it rendered.
    pub async fn discard(&self, job_id: Uuid, creatives: &[CreativeOutput]) {
        let mut keys = Vec::new();
        for output in creatives {
            if let Err(e) = self.catalog.delete_creative(output.creative_id).await {
                tracing::warn!(job_id = %job_id, creative_id = %output.creative_id, error = %e, "Failed to delete discarded creative");
            }
            keys.extend(output.assets.values().map(|a| a.key.clone()));
            keys.push(asset_key(output.creative_id, "layout.json"));
        }
        self.remove_assets(job_id, &keys).await;
    }

    async fn remove_assets(&self, job_id: Uuid, keys: &[String]) {
        for key in keys {
            if let Err(e) = self.assets.delete(key).await {
                tracing::warn!(job_id = %job_id, key = %key, error = %e, "Failed to delete asset");
            }
        }
        if !keys.is_empty() {
            tracing::info!(job_id = %job_id, removed = keys.len(), "Removed assets of unfinished job");
        }
    }

    async fn render_creative(
        &self,
        job_id: Uuid,
        brand_id: Uuid,
        item: &PlannedCreative,
        image: &GeneratedImage,
        uploaded: &mut Vec<String>,
    ) -> Result<(Creative, CreativeOutput), PipelineError> {
        let creative_id = Uuid::new_v4();

        let bytes = image.bytes.clone();
        let layouts = item.plan.layouts.clone();
        let canvases = tokio::task::spawn_blocking(move || render::render_all(&bytes, &layouts))
            .await
            .map_err(RenderError::from)??;

        let mut assets = CreativeAssets::default();
        let mut outputs = BTreeMap::new();
        for canvas in canvases {
            let key = asset_key(creative_id, &format!("{}.png", canvas.format));
            let url = self.assets.put(&key, &canvas.png, "image/png").await?;
            uploaded.push(key.clone());
            let asset = RenderedAsset {
                key,
                url,
                width: canvas.width,
                height: canvas.height,
                content_type: "image/png".to_string(),
            };
            assets.set(canvas.format, asset.clone());
            outputs.insert(canvas.format, asset);
        }

        let manifest = serde_json::to_vec_pretty(&item.plan).map_err(PipelineError::Manifest)?;
        let manifest_key = asset_key(creative_id, "layout.json");
        self.assets
            .put(&manifest_key, &manifest, "application/json")
            .await?;
        uploaded.push(manifest_key);

        let (panel, text) = item
            .plan
            .layouts
            .first()
            .map(|l| (l.panel_rgb(), Rgb::from_hex(&l.text_color).unwrap_or(Rgb::WHITE)))
            .unwrap_or((Rgb::BLACK, Rgb::WHITE));
        let validation_score = scoring::score_creative(
            &item.plan.copy,
            panel,
            text,
            &assets.formats(),
            &item.plan.formats(),
        )
        .score();

        let creative = Creative {
            id: creative_id,
            brand_id,
            template_id: item.template.id,
            job_id: Some(job_id),
            copy: item.plan.copy.clone(),
            assets,
            validation_score,
            status: CreativeStatus::Ready,
            created_at: chrono::Utc::now(),
        };

        tracing::info!(
            job_id = %job_id,
            creative_id = %creative_id,
            template_id = %item.template.id,
            score = validation_score,
            "Creative rendered"
        );

        let output = CreativeOutput {
            creative_id,
            template_id: item.template.id,
            headline: creative.copy.headline.clone(),
            assets: outputs,
            validation_score,
        };
        Ok((creative, output))
    }
}

fn record_stage(stage: Stage, started: Instant) {
    metrics::histogram!("creative_stage_seconds", "stage" => stage.to_string())
        .record(started.elapsed().as_secs_f64());
}

fn image_prompt(brand: &Brand, insights: &SiteInsights, copy: &CreativeCopy, brief: Option<&str>) -> String {
    let mut prompt = format!(
        "Advertising photograph for {}. Theme: {}.",
        brand.name, copy.headline
    );
    if let Some(brief) = brief {
        prompt.push_str(&format!(" Brief: {brief}."));
    }
    if !insights.palette.is_empty() {
        prompt.push_str(&format!(" Brand colors: {}.", insights.palette.join(", ")));
    }
    prompt.push_str(" No text, no logos, leave room for a copy panel.");
    prompt
}

/// Pair copy, images and templates into creatives for a job kind.
fn plan_creatives(
    kind: JobKind,
    templates: &[Template],
    identity: &BrandIdentity,
    copies: &[CreativeCopy],
    image_count: usize,
    payload: &JobPayload,
) -> Result<Vec<PlannedCreative>, PipelineError> {
    let pairs: Vec<(usize, usize, usize)> = match kind {
        // (template, copy, image)
        JobKind::SingleCreative => vec![(0, 0, 0)],
        JobKind::MultiCreative => (0..image_count).map(|i| (0, i % copies.len(), i)).collect(),
        JobKind::FullCampaign => (0..templates.len())
            .map(|t| (t, t % copies.len(), t % image_count))
            .collect(),
        JobKind::DataSync => Vec::new(),
    };

    pairs
        .into_iter()
        .map(|(t, c, image)| {
            let template = templates
                .get(t)
                .cloned()
                .ok_or(PipelineError::MissingTemplate)?;
            let formats = template.formats_for(&payload.formats);
            if formats.is_empty() {
                return Err(PipelineError::NoFormats(template.id));
            }
            let plan = compose(&template, identity, &copies[c], &formats);
            Ok(PlannedCreative {
                template,
                image,
                plan,
            })
        })
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Provider error: {0}")]
    Provider(ProviderError),

    #[error("Job was cancelled")]
    Cancelled,

    #[error("All image variations failed: {0}")]
    NoImages(String),

    #[error("Text provider returned no usable copy")]
    NoCopy,

    #[error("Job has no brand")]
    MissingBrand,

    #[error("Job has no template")]
    MissingTemplate,

    #[error("Template {0} supports none of the requested formats")]
    NoFormats(Uuid),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("Failed to write layout manifest: {0}")]
    Manifest(serde_json::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Job(#[from] JobError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::template::LayoutStyle;

    fn template(formats: Vec<CreativeFormat>) -> Template {
        Template {
            id: Uuid::new_v4(),
            name: "t".to_string(),
            layout: LayoutStyle::HeroImage,
            formats,
        }
    }

    fn copy(headline: &str) -> CreativeCopy {
        CreativeCopy {
            headline: headline.to_string(),
            primary_text: String::new(),
            description: String::new(),
            call_to_action: "LEARN_MORE".to_string(),
        }
    }

    #[test]
    fn test_stage_progress_increases() {
        let stages = [
            Stage::Started,
            Stage::SiteAnalysis,
            Stage::TextGeneration,
            Stage::ImageGeneration,
            Stage::Composition,
            Stage::Render,
        ];
        assert!(stages.windows(2).all(|w| w[0].progress() < w[1].progress()));
        assert_eq!(Stage::ImageGeneration.to_string(), "image-generation");
    }

    #[test]
    fn test_multi_creative_cycles_copy() {
        let templates = vec![template(vec![CreativeFormat::Square])];
        let copies = vec![copy("a"), copy("b")];
        let planned = plan_creatives(
            JobKind::MultiCreative,
            &templates,
            &BrandIdentity::default(),
            &copies,
            3,
            &JobPayload::default(),
        )
        .unwrap();
        let headlines: Vec<_> = planned.iter().map(|p| p.plan.copy.headline.as_str()).collect();
        assert_eq!(headlines, vec!["a", "b", "a"]);
        assert_eq!(planned.iter().map(|p| p.image).collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn test_full_campaign_one_creative_per_template() {
        let templates = vec![
            template(vec![CreativeFormat::Square]),
            template(vec![CreativeFormat::Story]),
            template(vec![CreativeFormat::Landscape]),
        ];
        let planned = plan_creatives(
            JobKind::FullCampaign,
            &templates,
            &BrandIdentity::default(),
            &[copy("a")],
            2,
            &JobPayload::default(),
        )
        .unwrap();
        assert_eq!(planned.len(), 3);
        assert_eq!(planned[2].image, 0);
        assert_eq!(planned[1].plan.formats(), vec![CreativeFormat::Story]);
    }

    #[test]
    fn test_unsupported_formats_fail_composition() {
        let templates = vec![template(vec![CreativeFormat::Square])];
        let payload = JobPayload {
            formats: vec![CreativeFormat::Landscape],
            ..Default::default()
        };
        let err = plan_creatives(
            JobKind::SingleCreative,
            &templates,
            &BrandIdentity::default(),
            &[copy("a")],
            1,
            &payload,
        )
        .err()
        .unwrap();
        assert!(matches!(err, PipelineError::NoFormats(_)));
    }
}
