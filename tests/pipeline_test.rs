mod helpers;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use creative_engine::db::CatalogStore;
use creative_engine::models::job::{JobKind, JobPayload, JobStatus};
use creative_engine::services::jobs::JobQueue;
use creative_engine::services::pipeline::Pipeline;
use creative_engine::services::progress::ProgressEvent;
use creative_engine::services::worker::{process_job, JobOutcome};

use helpers::{
    files_under, fixture, fixture_full, fixture_with, wait_for_progress, FakeImages, FakeText, Fixture,
    PanickingText,
};

/// Claim the next queued job and run it to a terminal state.
async fn run_next(queue: &JobQueue, pipeline: &Pipeline) -> JobOutcome {
    let interrupt = CancellationToken::new();
    let claimed = queue
        .claim("test-worker", &interrupt)
        .await
        .unwrap()
        .expect("a queued job");
    process_job(queue, pipeline, claimed, &interrupt).await
}

fn single(fx: &Fixture) -> JobPayload {
    JobPayload {
        brand_id: Some(fx.brand_id),
        template_id: Some(fx.templates[0]),
        prompt: Some("Spring launch".to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_single_creative_end_to_end() {
    let fx = fixture().await;
    let job = fx.queue.enqueue(JobKind::SingleCreative, single(&fx)).await.unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(fx.queue.get_status(job.id).await.unwrap().status, JobStatus::Pending);

    assert_eq!(run_next(&fx.queue, &fx.pipeline).await, JobOutcome::Completed);

    let job = fx.queue.get_status(job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100);
    assert!(job.error.is_none());
    let result = job.result.expect("completed job carries a result");
    assert_eq!(result.creatives.len(), 1);
    assert_eq!(result.image_variations, 1);
    // Hero template renders all three placements.
    assert_eq!(result.formats.len(), 3);

    let output = &result.creatives[0];
    assert_eq!(output.template_id, fx.templates[0]);
    assert!(output.validation_score > 0.0 && output.validation_score <= 1.0);

    let stored = fx.store.creatives_for_job(job.id).await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, output.creative_id);
    assert_eq!(stored[0].brand_id, fx.brand_id);

    for asset in output.assets.values() {
        assert!(fx.asset_root.join(&asset.key).exists(), "missing {}", asset.key);
        assert!(asset.url.starts_with("http://assets.test/"));
    }
    let manifest = fx
        .asset_root
        .join(format!("creatives/{}/layout.json", output.creative_id));
    let manifest: serde_json::Value =
        serde_json::from_slice(&std::fs::read(manifest).unwrap()).unwrap();
    assert_eq!(manifest["copy"]["headline"], output.headline.as_str());
}

#[tokio::test]
async fn test_multi_creative_keeps_successful_variations() {
    let images = Arc::new(FakeImages::failing(&[1]));
    let fx = fixture_with(Arc::new(FakeText::default()), images.clone()).await;
    let payload = JobPayload {
        variations: 3,
        ..single(&fx)
    };
    let job = fx.queue.enqueue(JobKind::MultiCreative, payload).await.unwrap();

    assert_eq!(run_next(&fx.queue, &fx.pipeline).await, JobOutcome::Completed);

    assert_eq!(images.calls.load(Ordering::SeqCst), 3);
    let result = fx.queue.get_status(job.id).await.unwrap().result.unwrap();
    assert_eq!(result.image_variations, 2);
    assert_eq!(result.creatives.len(), 2);
    assert_ne!(result.creatives[0].headline, result.creatives[1].headline);
    assert_eq!(fx.store.creatives_for_job(job.id).await.len(), 2);
}

#[tokio::test]
async fn test_all_variations_failing_fails_job() {
    let fx = fixture_with(Arc::new(FakeText::default()), Arc::new(FakeImages::failing(&[0, 1, 2]))).await;
    let payload = JobPayload {
        variations: 3,
        ..single(&fx)
    };
    let job = fx.queue.enqueue(JobKind::MultiCreative, payload).await.unwrap();

    assert_eq!(run_next(&fx.queue, &fx.pipeline).await, JobOutcome::Failed);

    let job = fx.queue.get_status(job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.result.is_none());
    assert!(job.error.unwrap().contains("variation 2 rejected"));
    assert!(fx.store.creatives_for_job(job.id).await.is_empty());
}

#[tokio::test]
async fn test_render_failure_leaves_no_creatives_behind() {
    // The first creative renders fine, the second cannot decode its image.
    let images = Arc::new(FakeImages::truncated(&[1]));
    let fx = fixture_with(Arc::new(FakeText::default()), images).await;
    let payload = JobPayload {
        variations: 2,
        ..single(&fx)
    };
    let job = fx.queue.enqueue(JobKind::MultiCreative, payload).await.unwrap();

    assert_eq!(run_next(&fx.queue, &fx.pipeline).await, JobOutcome::Failed);

    let job = fx.queue.get_status(job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.result.is_none());
    assert!(fx.store.creatives_for_job(job.id).await.is_empty());
    assert_eq!(files_under(&fx.asset_root.join("creatives")), 0);
}

#[tokio::test]
async fn test_subscriber_sees_monotonic_progress_then_result() {
    let fx = fixture().await;
    let job = fx.queue.enqueue(JobKind::SingleCreative, single(&fx)).await.unwrap();
    let mut sub = fx.queue.progress().subscribe(job.id);

    run_next(&fx.queue, &fx.pipeline).await;

    let mut seen = Vec::new();
    let terminal = loop {
        match sub.try_recv().expect("events were published") {
            ProgressEvent::Progress { progress, .. } => seen.push(progress),
            other => break other,
        }
    };
    assert_eq!(seen, vec![5, 20, 40, 70, 80, 95]);
    match terminal {
        ProgressEvent::Generated { job_id, result } => {
            assert_eq!(job_id, job.id);
            assert_eq!(result.creatives.len(), 1);
        }
        other => panic!("unexpected terminal event {other:?}"),
    }
    assert!(sub.try_recv().is_none());
}

#[tokio::test]
async fn test_late_subscriber_gets_nothing_but_polling_works() {
    let fx = fixture().await;
    let job = fx.queue.enqueue(JobKind::SingleCreative, single(&fx)).await.unwrap();
    run_next(&fx.queue, &fx.pipeline).await;

    let mut late = fx.queue.progress().subscribe(job.id);
    assert!(late.try_recv().is_none());
    assert_eq!(fx.queue.get_status(job.id).await.unwrap().status, JobStatus::Completed);
}

#[tokio::test]
async fn test_cancel_mid_run_stops_job_without_creatives() {
    let images = Arc::new(FakeImages::slow(Duration::from_secs(5)));
    let fx = fixture_with(Arc::new(FakeText::default()), images).await;
    let job = fx.queue.enqueue(JobKind::SingleCreative, single(&fx)).await.unwrap();

    let queue = fx.queue.clone();
    let pipeline = fx.pipeline.clone();
    let task = tokio::spawn(async move { run_next(&queue, &pipeline).await });

    // Copy is done and the image call is in flight.
    wait_for_progress(&fx.store, job.id, 40).await;
    let cancelled = fx.queue.cancel(job.id).await.unwrap();
    assert!(cancelled.changed);

    let outcome = tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("cancel interrupts the provider call")
        .unwrap();
    assert_eq!(outcome, JobOutcome::Cancelled);

    let job = fx.queue.get_status(job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(job.result.is_none());
    assert!(fx.store.creatives_for_job(job.id).await.is_empty());
    assert_eq!(fx.queue.active_count(), 0);

    // A second cancel is a no-op on the terminal job.
    assert!(!fx.queue.cancel(job.id).await.unwrap().changed);
}

#[tokio::test]
async fn test_cancel_from_another_process_ends_the_event_stream() {
    let images = Arc::new(FakeImages::slow(Duration::from_millis(300)));
    let fx = fixture_with(Arc::new(FakeText::default()), images).await;
    let job = fx.queue.enqueue(JobKind::SingleCreative, single(&fx)).await.unwrap();
    let mut sub = fx.queue.progress().subscribe(job.id);

    // Same store and hub, but none of the worker's in-process tokens.
    let gateway = JobQueue::new(
        fx.store.clone(),
        fx.store.clone(),
        fx.broker.clone(),
        fx.queue.progress().clone(),
    );

    let queue = fx.queue.clone();
    let pipeline = fx.pipeline.clone();
    let task = tokio::spawn(async move { run_next(&queue, &pipeline).await });

    wait_for_progress(&fx.store, job.id, 40).await;
    assert!(gateway.cancel(job.id).await.unwrap().changed);

    // The image call finishes and the next stage boundary notices the cancel.
    let outcome = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("worker stops at the next boundary")
        .unwrap();
    assert_eq!(outcome, JobOutcome::Cancelled);

    let mut seen = Vec::new();
    while let Some(event) = sub.try_recv() {
        seen.push(event);
    }
    let progress: Vec<u8> = seen
        .iter()
        .filter_map(|event| match event {
            ProgressEvent::Progress { progress, .. } => Some(*progress),
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec![5, 20, 40]);
    assert!(matches!(seen.last(), Some(ProgressEvent::Cancelled { .. })), "{seen:?}");

    let job = fx.queue.get_status(job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(job.progress, 40);
    assert!(fx.store.creatives_for_job(job.id).await.is_empty());
    assert_eq!(fx.queue.active_count(), 0);
}

#[tokio::test]
async fn test_cancel_while_pending_is_never_run() {
    let fx = fixture().await;
    let job = fx.queue.enqueue(JobKind::SingleCreative, single(&fx)).await.unwrap();
    fx.queue.cancel(job.id).await.unwrap();

    let interrupt = CancellationToken::new();
    assert!(fx.queue.claim("test-worker", &interrupt).await.unwrap().is_none());
    assert_eq!(fx.queue.get_status(job.id).await.unwrap().status, JobStatus::Cancelled);
    assert_eq!(fx.broker.in_flight().await, 0);
}

#[tokio::test]
async fn test_data_sync_refreshes_brand_identity() {
    let fx = fixture().await;
    let payload = JobPayload {
        brand_id: Some(fx.brand_id),
        ..Default::default()
    };
    let job = fx.queue.enqueue(JobKind::DataSync, payload).await.unwrap();

    assert_eq!(run_next(&fx.queue, &fx.pipeline).await, JobOutcome::Completed);

    let result = fx.queue.get_status(job.id).await.unwrap().result.unwrap();
    assert!(result.creatives.is_empty());
    let identity = result.brand_identity.expect("sync returns the identity");
    assert_eq!(identity.primary_color.as_deref(), Some("#0d47a1"));
    assert_eq!(identity.font_family.as_deref(), Some("Inter"));
    assert_eq!(identity.description.as_deref(), Some("Rockets delivered fast."));

    let brand = fx.store.get_brand(fx.brand_id).await.unwrap().unwrap();
    assert_eq!(brand.identity, identity);
}

#[tokio::test]
async fn test_full_campaign_renders_every_template() {
    let fx = fixture().await;
    let payload = JobPayload {
        brand_id: Some(fx.brand_id),
        template_ids: fx.templates.clone(),
        variations: 2,
        ..Default::default()
    };
    let job = fx.queue.enqueue(JobKind::FullCampaign, payload).await.unwrap();

    assert_eq!(run_next(&fx.queue, &fx.pipeline).await, JobOutcome::Completed);

    let result = fx.queue.get_status(job.id).await.unwrap().result.unwrap();
    assert_eq!(result.creatives.len(), 3);
    let templates: Vec<_> = result.creatives.iter().map(|c| c.template_id).collect();
    assert_eq!(templates, fx.templates);
    // Split template has no story format.
    assert_eq!(result.creatives[1].assets.len(), 2);
}

#[tokio::test]
async fn test_panicking_provider_fails_job() {
    let fx = fixture_with(Arc::new(PanickingText), Arc::new(FakeImages::ok())).await;
    let job = fx.queue.enqueue(JobKind::SingleCreative, single(&fx)).await.unwrap();

    assert_eq!(run_next(&fx.queue, &fx.pipeline).await, JobOutcome::Failed);

    let job = fx.queue.get_status(job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    let error = job.error.unwrap();
    assert!(error.starts_with("worker panicked"), "{error}");
    assert!(error.contains("copy model exploded"));
    assert_eq!(fx.queue.active_count(), 0);
}

#[tokio::test]
async fn test_provider_timeout_fails_job() {
    let fx = fixture_full(
        Arc::new(FakeText::default()),
        Arc::new(FakeImages::slow(Duration::from_secs(2))),
        Duration::from_millis(50),
    )
    .await;
    let job = fx.queue.enqueue(JobKind::SingleCreative, single(&fx)).await.unwrap();

    assert_eq!(run_next(&fx.queue, &fx.pipeline).await, JobOutcome::Failed);

    let job = fx.queue.get_status(job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_enqueue_rejects_unknown_references() {
    let fx = fixture().await;
    let payload = JobPayload {
        template_id: Some(uuid::Uuid::new_v4()),
        ..single(&fx)
    };
    assert!(fx.queue.enqueue(JobKind::SingleCreative, payload).await.is_err());

    let payload = JobPayload {
        template_id: None,
        ..single(&fx)
    };
    assert!(fx.queue.enqueue(JobKind::SingleCreative, payload).await.is_err());
    assert_eq!(fx.queue.queue_depth().await.unwrap(), 0);
}
