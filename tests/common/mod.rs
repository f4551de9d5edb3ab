//! Common test utilities
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use chrono::{DateTime, Utc};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use order_aggregator::aggregate::{AccountState, Aggregator, Mutation, RemovePolicy};
use order_aggregator::api::{self, AppState};
use order_aggregator::dead_letter::MemoryDeadLetters;
use order_aggregator::forwarder::DispatchForwarder;
use order_aggregator::handlers::{Pipeline, PipelineSettings, StreamBatchHandler};
use order_aggregator::queue::MemoryQueue;
use order_aggregator::retry::RetryPolicy;
use order_aggregator::store::{CommitStatus, StoreError, SummaryRecord, SummaryStore};
use order_aggregator::OrderEvent;

// =========================================================================
// In-memory wiring
// =========================================================================

pub fn settings() -> PipelineSettings {
    PipelineSettings {
        operation_timeout: Duration::from_secs(2),
        delivery_retry: RetryPolicy::new(3, Duration::ZERO),
    }
}

pub fn pipeline(
    store: Arc<dyn SummaryStore>,
    dead_letters: Arc<MemoryDeadLetters>,
    policy: RemovePolicy,
) -> Pipeline {
    Pipeline::new(
        Aggregator::new(store, policy, RetryPolicy::new(10, Duration::ZERO)),
        dead_letters,
        settings(),
    )
}

/// App applying change-feed records directly to `store`
pub fn direct_app(store: Arc<dyn SummaryStore>, dead_letters: Arc<MemoryDeadLetters>) -> Router {
    let pipeline = Arc::new(pipeline(store.clone(), dead_letters, RemovePolicy::Clamp));
    api::build_app(AppState::new(store, StreamBatchHandler::new(pipeline)))
}

/// App forwarding change-feed records to `queue`
pub fn forward_app(
    store: Arc<dyn SummaryStore>,
    dead_letters: Arc<MemoryDeadLetters>,
    queue: Arc<MemoryQueue>,
) -> Router {
    let forwarder = DispatchForwarder::new(
        queue,
        Duration::from_secs(10),
        RetryPolicy::new(3, Duration::ZERO),
        Duration::from_secs(2),
    );
    let pipeline = Arc::new(
        pipeline(store.clone(), dead_letters, RemovePolicy::Clamp).with_forwarder(Arc::new(forwarder)),
    );
    api::build_app(AppState::new(store, StreamBatchHandler::new(pipeline)))
}

// =========================================================================
// Change-feed records
// =========================================================================

pub fn insert_record(id: &str, account: &str, price: &str, qty: &str) -> Value {
    json!({
        "eventID": id,
        "eventName": "INSERT",
        "dynamodb": {
            "NewImage": {
                "accountid": {"S": account},
                "unitprice": {"N": price},
                "quantity": {"N": qty}
            }
        }
    })
}

pub fn remove_record(id: &str, target: &str, account: &str) -> Value {
    json!({
        "eventID": id,
        "eventName": "REMOVE",
        "retracts": target,
        "dynamodb": {
            "OldImage": {
                "accountid": {"S": account},
                "unitprice": {"N": "0"},
                "quantity": {"N": "1"}
            }
        }
    })
}

pub fn batch_request(records: Vec<Value>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/stream/records")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "Records": records }).to_string()))
        .unwrap()
}

pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

// =========================================================================
// Test doubles
// =========================================================================

/// Store whose backend is unreachable
pub struct UnavailableStore;

#[async_trait]
impl SummaryStore for UnavailableStore {
    async fn load_state(&self, _: &str, _: &OrderEvent) -> Result<AccountState, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
    async fn commit(&self, _: &Mutation) -> Result<CommitStatus, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
    async fn get_summary(&self, _: &str) -> Result<Option<SummaryRecord>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
    async fn prune_ledger(&self, _: DateTime<Utc>) -> Result<u64, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
    async fn ping(&self) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
}

// =========================================================================
// Postgres
// =========================================================================

/// Connect to DATABASE_URL and create a fresh summary table set named `table`
pub async fn setup_test_db(table: &str) -> PgPool {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for tests");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    sqlx::query(&format!("DROP TABLE IF EXISTS {}_events, {} CASCADE", table, table))
        .execute(&pool)
        .await
        .expect("Failed to drop test tables");

    order_aggregator::db::create_schema(&pool, table)
        .await
        .expect("Failed to create schema");

    pool
}
