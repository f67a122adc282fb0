//! Standalone worker for the `notifications` queue.
//!
//! Wizard and CRM jobs need an agent runtime and a CRM client, which the
//! embedding service provides; this binary only fans queued events out to
//! webhooks.

use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use brandkit_infra::Settings;
use brandkit_infra::jobs::{JobWorker, JobWorkerConfig, Queue, RedisJobBroker};
use brandkit_infra::notifications::NotificationHandler;
use brandkit_infra::webhooks::{
    InMemoryWebhookStore, PostgresWebhookStore, ReqwestTransport, WebhookEngine, WebhookStore,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    brandkit_observability::init();

    let settings = Settings::from_env().context("invalid settings")?;

    let broker = Arc::new(
        RedisJobBroker::connect(&settings.redis_url)
            .await
            .context("failed to connect to redis")?,
    );

    let store: Arc<dyn WebhookStore> = match settings.database_url.as_deref() {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(url)
                .await
                .context("failed to connect to postgres")?;
            Arc::new(PostgresWebhookStore::new(pool))
        }
        None => Arc::new(InMemoryWebhookStore::new()),
    };

    let webhook_settings = settings.webhook_settings();
    let transport = Arc::new(
        ReqwestTransport::new(webhook_settings.timeout).context("failed to build http client")?,
    );
    let webhooks = WebhookEngine::new(store, transport, webhook_settings);

    let mut worker = JobWorker::new(broker);
    worker.register_handler(
        Queue::Notifications,
        Arc::new(NotificationHandler::new(webhooks)),
    );
    let handle = worker.spawn(JobWorkerConfig::default().with_name("notifications-worker"));
    info!(queue = Queue::Notifications.name(), "worker started");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    let stats = handle.stats();
    handle.shutdown().await;
    info!(
        processed = stats.jobs_processed,
        succeeded = stats.jobs_succeeded,
        failed = stats.jobs_failed,
        "worker stopped"
    );
    Ok(())
}
