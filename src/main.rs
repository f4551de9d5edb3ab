//! order_aggregator - exactly-once account summaries over at-least-once feeds
//!
//! Ingests order change-feed batches over HTTP, optionally forwards them
//! through SQS, and folds every event into a per-account running total.

use std::net::SocketAddr;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use order_aggregator::aggregate::Aggregator;
use order_aggregator::api::{self, AppState};
use order_aggregator::consumer::QueueConsumer;
use order_aggregator::dead_letter::{DeadLetterSink, PgDeadLetterStore, QueueDeadLetterSink};
use order_aggregator::db;
use order_aggregator::forwarder::DispatchForwarder;
use order_aggregator::handlers::{Pipeline, PipelineSettings, QueueDeliveryHandler, StreamBatchHandler};
use order_aggregator::jobs::{LedgerRetentionConfig, LedgerRetentionJob};
use order_aggregator::queue::{MessageQueue, SqsConfig, SqsQueue};
use order_aggregator::store::{PgSummaryStore, SummaryStore};
use order_aggregator::{Config, StreamMode};

/// Initialize tracing/logging
fn init_tracing(json: bool) {
    let registry = tracing_subscriber::registry().with(
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "order_aggregator=debug,tower_http=debug".into()),
    );

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn sqs_config(config: &Config, queue_url: &str) -> SqsConfig {
    let mut sqs = SqsConfig::new(queue_url);
    if let Some(region) = &config.aws_region {
        sqs = sqs.with_region(region.clone());
    }
    if let Some(endpoint) = &config.aws_endpoint_url {
        sqs = sqs.with_endpoint(endpoint.clone());
    }
    sqs
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    init_tracing(config.is_production());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    tracing::info!(
        stream_mode = ?config.stream_mode,
        remove_policy = ?config.remove_policy,
        summary_table = %config.summary_table,
        "Starting order aggregator"
    );
    tracing::info!("Connecting to database...");

    // Create database pool
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;

    // Verify database schema
    let needs_dead_letter_table = config.dead_letter_queue_url.is_none();
    if !db::check_schema(&pool, &config.summary_table, needs_dead_letter_table).await? {
        tracing::error!("Database schema is not complete. Please run migrations.");
        return Err(anyhow::anyhow!("Database schema incomplete"));
    }
    tracing::info!("Database connected successfully");

    let store: Arc<dyn SummaryStore> = Arc::new(PgSummaryStore::new(pool.clone(), &config.summary_table)?);

    let queue: Arc<dyn MessageQueue> =
        Arc::new(SqsQueue::connect(sqs_config(&config, &config.queue_url)).await);

    let dead_letters: Arc<dyn DeadLetterSink> = match &config.dead_letter_queue_url {
        Some(url) => {
            let dlq: Arc<dyn MessageQueue> = Arc::new(SqsQueue::connect(sqs_config(&config, url)).await);
            Arc::new(QueueDeadLetterSink::new(dlq))
        }
        None => Arc::new(PgDeadLetterStore::new(pool.clone())),
    };

    let aggregator = Aggregator::new(store.clone(), config.remove_policy, config.conflict_retry());
    let settings = PipelineSettings {
        operation_timeout: config.operation_timeout,
        delivery_retry: config.delivery_retry(),
    };
    let mut pipeline = Pipeline::new(aggregator, dead_letters, settings);
    if config.stream_mode == StreamMode::Forward {
        pipeline = pipeline.with_forwarder(Arc::new(DispatchForwarder::new(
            queue.clone(),
            config.forward_delay,
            config.delivery_retry(),
            config.operation_timeout,
        )));
    }
    let pipeline = Arc::new(pipeline);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut background = Vec::new();

    if config.consumer_enabled {
        let handler = QueueDeliveryHandler::new(pipeline.clone(), queue.clone());
        let consumer = QueueConsumer::new(queue.clone(), handler, config.consumer());
        background.extend(consumer.start(shutdown_rx.clone()));
    }

    if let Some(days) = config.ledger_retention_days {
        let job = LedgerRetentionJob::new(store.clone(), LedgerRetentionConfig::days(days));
        background.push(job.start(shutdown_rx.clone()));
    }

    // Build router and start server
    let state = AppState::new(store, StreamBatchHandler::new(pipeline));
    let app = api::build_app(state);

    tracing::info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Cleanup
    tracing::info!("Server shutting down...");
    let _ = shutdown_tx.send(true);
    for handle in background {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Background task failed");
        }
    }
    pool.close().await;
    tracing::info!("Database connections closed. Goodbye!");

    Ok(())
}

/// Shutdown signal handler for graceful shutdown
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}
