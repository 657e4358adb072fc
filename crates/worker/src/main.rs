use std::sync::Arc;

use anyhow::{Context, Result};
use neofeed_core::memory::{
    InMemoryFeedStore, InMemoryReportStore, InMemorySubscriptionStore, InMemoryUserDirectory,
};
use neofeed_core::telemetry::{init_telemetry, TelemetryConfig};
use neofeed_durable::{InMemoryRunStore, RunStore, WorkerPool};
use neofeed_storage::{
    create_db_feed_store, create_db_report_store, create_db_subscription_store,
    create_db_user_directory, Database,
};
use neofeed_worker::adapters::{HttpContentFetcher, HttpFeedReader, HttpNotifier, OpenAiSummarizer};
use neofeed_worker::{http, Pipeline, PipelineApi, PipelineDeps, WorkerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Keep the guard alive for the lifetime of the application
    let _telemetry_guard =
        init_telemetry(TelemetryConfig::from_env().with_service_name("neofeed-worker"));

    tracing::info!("neofeed-worker starting...");

    let config = WorkerConfig::from_env();
    tracing::info!(
        worker_id = %config.worker_id,
        max_concurrency = config.max_concurrency,
        persistent = config.database_url.is_some(),
        "Loaded configuration"
    );

    let fetcher = HttpContentFetcher::new(config.fetch_timeout, config.fetch_max_chars)
        .context("Failed to build content fetcher")?;
    let feed_reader =
        HttpFeedReader::new(config.fetch_timeout).context("Failed to build feed reader")?;
    let summarizer =
        OpenAiSummarizer::new(config.summarizer.clone()).context("Failed to build summarizer")?;
    let notifier = HttpNotifier::new(config.email.clone(), config.fetch_timeout)
        .context("Failed to build notifier")?;
    if config.summarizer.api_key.is_none() {
        tracing::warn!("SUMMARIZER_API_KEY not set; captures are stored without summaries unless users bring their own key");
    }

    let (store, deps): (Arc<dyn RunStore>, PipelineDeps) = match &config.database_url {
        Some(url) => {
            let db = Database::from_url(url, 10)
                .await
                .context("Failed to connect to database")?;
            db.migrate().await?;
            tracing::info!("Connected to database");
            (
                Arc::new(db.run_store()),
                PipelineDeps {
                    fetcher: Arc::new(fetcher),
                    feed_reader: Arc::new(feed_reader),
                    summarizer: Arc::new(summarizer),
                    notifier: Arc::new(notifier),
                    feeds: Arc::new(create_db_feed_store(db.clone())),
                    subscriptions: Arc::new(create_db_subscription_store(db.clone())),
                    users: Arc::new(create_db_user_directory(db.clone())),
                    reports: Arc::new(create_db_report_store(db)),
                },
            )
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory stores, state is lost on exit");
            (
                Arc::new(InMemoryRunStore::new()),
                PipelineDeps {
                    fetcher: Arc::new(fetcher),
                    feed_reader: Arc::new(feed_reader),
                    summarizer: Arc::new(summarizer),
                    notifier: Arc::new(notifier),
                    feeds: Arc::new(InMemoryFeedStore::new()),
                    subscriptions: Arc::new(InMemorySubscriptionStore::new()),
                    users: Arc::new(InMemoryUserDirectory::new()),
                    reports: Arc::new(InMemoryReportStore::new()),
                },
            )
        }
    };

    let pipeline = Pipeline::build(store, deps, &config.pipeline_settings())
        .context("Failed to wire pipeline")?;

    let pool = WorkerPool::new(pipeline.executor.clone(), config.worker_pool_config());
    pool.start().context("Failed to start worker pool")?;
    pipeline
        .router
        .start_cron()
        .await
        .context("Failed to start cron triggers")?;

    let app = http::routes(PipelineApi::new(
        pipeline.router.clone(),
        pipeline.executor.clone(),
    ));
    let listener = tokio::net::TcpListener::bind(config.http_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.http_addr))?;
    tracing::info!("HTTP server listening on {}", config.http_addr);

    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal");
        }
    }

    pipeline.router.shutdown_cron().await;
    pool.shutdown().await.context("Failed to stop worker pool")?;

    tracing::info!("Worker shutdown complete");
    Ok(())
}
