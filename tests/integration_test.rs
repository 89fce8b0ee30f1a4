mod helpers;

use std::sync::Arc;
use std::time::Duration;
use tokio_test::assert_ok;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use creative_engine::bootstrap;
use creative_engine::config::AppConfig;
use creative_engine::db::{CatalogStore, JobStore};
use creative_engine::models::brand::{Brand, BrandIdentity};
use creative_engine::models::creative::CreativeFormat;
use creative_engine::models::job::{JobKind, JobPayload, JobStatus};
use creative_engine::models::template::{LayoutStyle, Template};
use creative_engine::services::pipeline::Pipeline;
use creative_engine::services::progress::{ProgressEvent, ProgressHub};
use creative_engine::services::relay::ProgressRelay;
use creative_engine::services::worker::{ShutdownPolicy, WorkerConfig, WorkerPool};

use helpers::{FakeImages, FakeSite, FakeText};

/// Full flow against PostgreSQL and Redis, with fake AI providers:
/// enqueue, claim through the Redis broker, render, store, and poll.
///
/// Requires `DATABASE_URL` and `REDIS_URL` (and the usual asset settings).
#[tokio::test]
#[ignore] // Run with: cargo test --test integration_test -- --ignored
async fn test_full_integration() {
    let _ = dotenvy::dotenv();
    let config = AppConfig::from_env().expect("Failed to load config");
    let services = bootstrap::connect(&config).await.expect("Failed to connect");

    assert_ok!(services.queue.store_health().await);
    assert_ok!(services.queue.broker_health().await);

    let brand = Brand {
        id: Uuid::new_v4(),
        name: "Integration Rockets".to_string(),
        website: Some("https://acme.test".to_string()),
        identity: BrandIdentity::default(),
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
    };
    assert_ok!(services.store.insert_brand(&brand).await);
    let template = Template {
        id: Uuid::new_v4(),
        name: "Integration hero".to_string(),
        layout: LayoutStyle::HeroImage,
        formats: vec![CreativeFormat::Square],
    };
    assert_ok!(services.store.insert_template(&template).await);

    let job = services
        .queue
        .enqueue(
            JobKind::SingleCreative,
            JobPayload {
                brand_id: Some(brand.id),
                template_id: Some(template.id),
                ..Default::default()
            },
        )
        .await
        .expect("Failed to enqueue");

    let pipeline = Arc::new(Pipeline::new(
        services.store.clone(),
        Arc::new(FakeSite),
        Arc::new(FakeText::default()),
        Arc::new(FakeImages::ok()),
        services.assets.clone(),
        Duration::from_secs(10),
    ));
    let pool = WorkerPool::new(
        services.queue.clone(),
        pipeline,
        WorkerConfig {
            worker_id: "integration".to_string(),
            concurrency: 1,
            poll_interval: Duration::from_millis(50),
            shutdown_policy: ShutdownPolicy::Drain,
            shutdown_grace: Duration::from_secs(10),
        },
    );
    let shutdown = CancellationToken::new();
    let run = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { pool.run(shutdown).await }
    });

    // Other jobs may share the queue; wait for ours only.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(60);
    let finished = loop {
        let current = services.store.get_job(job.id).await.unwrap().unwrap();
        if current.status.is_terminal() {
            break current;
        }
        assert!(tokio::time::Instant::now() < deadline, "job did not finish");
        tokio::time::sleep(Duration::from_millis(100)).await;
    };
    shutdown.cancel();
    run.await.unwrap();

    assert_eq!(finished.status, JobStatus::Completed, "error: {:?}", finished.error);
    let result = finished.result.unwrap();
    let creative_id = result.creatives[0].creative_id;
    let creative = services.store.get_creative(creative_id).await.unwrap().unwrap();
    assert_eq!(creative.job_id, Some(job.id));

    let key = &creative.assets.square.as_ref().unwrap().key;
    let png = services.assets.get(key).await.expect("Rendered asset is stored");
    assert!(!png.is_empty());

    assert_ok!(services.store.delete_creative(creative_id).await);
    let _ = services.assets.delete(key).await;
}

/// Progress events cross processes through Redis pub/sub.
#[tokio::test]
#[ignore]
async fn test_progress_relay_round_trip() {
    let _ = dotenvy::dotenv();
    let config = AppConfig::from_env().expect("Failed to load config");
    let client = redis::Client::open(config.redis_url.as_str()).expect("Bad Redis URL");
    let channel = format!("creative_engine:test:{}", Uuid::new_v4());

    let api_hub = Arc::new(ProgressHub::new());
    let job_id = Uuid::new_v4();
    let mut sub = api_hub.subscribe(job_id);

    let stop = CancellationToken::new();
    let ingest = ProgressRelay::new(client.clone(), &channel, "api");
    let ingest_task = tokio::spawn({
        let hub = api_hub.clone();
        let stop = stop.clone();
        async move { ingest.ingest_into(hub, stop).await }
    });
    // Give the subscriber time to attach.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let worker_hub = ProgressHub::new();
    let tap = worker_hub.subscribe_all();
    let publisher = ProgressRelay::new(client, &channel, "worker");
    let publish_task = tokio::spawn({
        let stop = stop.clone();
        async move { publisher.publish_from(tap, stop).await }
    });
    worker_hub.publish(ProgressEvent::Cancelled { job_id });

    let event = tokio::time::timeout(Duration::from_secs(5), sub.recv())
        .await
        .expect("relayed event arrives")
        .unwrap();
    assert_eq!(event, ProgressEvent::Cancelled { job_id });

    stop.cancel();
    let _ = tokio::join!(ingest_task, publish_task);
}
