mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use async_trait::async_trait;
use common::Harness;
use serde_json::{Value, json};
use tower::ServiceExt;
use wallet_service::cache::MemoryWalletCache;
use wallet_service::error::AppError;
use wallet_service::handlers::{self, AppState};
use wallet_service::messaging::{EventPublisher, RecordingPublisher, RetryPolicy};
use wallet_service::metrics::{PrometheusMetrics, RecordingMetrics};
use wallet_service::repository::MemoryStore;
use wallet_service::services::{TransactionService, WalletService};

fn app(h: &Harness) -> Router {
    handlers::router(
        AppState {
            wallets: h.wallets.clone(),
            transactions: h.transactions.clone(),
            registry: Arc::new(PrometheusMetrics::new().unwrap()),
        },
        Duration::from_secs(5),
    )
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn charge_endpoint_opens_and_credits() {
    let h = Harness::new();
    let app = app(&h);

    let (status, body) = send(
        &app,
        post("/api/v1/wallet/charge", json!({"mobile": "09123000001", "amount": 30})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["balance"], 30);
    assert_eq!(body["opened"], true);

    let (status, body) = send(
        &app,
        post("/api/v1/wallet/charge", json!({"mobile": "09123000001", "amount": 20})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["balance"], 50);
    assert_eq!(body["opened"], false);

    let wallet_id = body["wallet_id"].as_str().unwrap().to_string();
    let (status, rows) = send(&app, get(&format!("/api/v1/wallet/{wallet_id}/transactions"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rows.as_array().unwrap().len(), 2);
    assert_eq!(rows[0]["type"], "Charge");
    assert!(rows[0].get("idempotency_key").is_none());
}

#[tokio::test]
async fn wallet_lookup_endpoints() {
    let h = Harness::new();
    let app = app(&h);

    let (status, created) = send(
        &app,
        post(
            "/api/v1/wallet",
            json!({"name": "Sara", "mobile": "09123000002", "balance": 10}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["id"].as_str().unwrap().to_string();

    let (status, by_id) = send(&app, get(&format!("/api/v1/wallet/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(by_id["name"], "Sara");

    let (status, by_mobile) = send(&app, get("/api/v1/wallet/mobile/09123000002")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(by_mobile["id"], id.as_str());

    let (status, conflict) = send(
        &app,
        post("/api/v1/wallet", json!({"mobile": "09123000002"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(conflict["error"]["code"], "wallet_exists");
}

#[tokio::test]
async fn errors_map_to_status_codes() {
    let h = Harness::new();
    let app = app(&h);

    let (status, body) = send(
        &app,
        post("/api/v1/wallet/charge", json!({"mobile": "not-a-phone", "amount": 5})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_request");

    let (status, body) = send(
        &app,
        get(&format!("/api/v1/wallet/{}", uuid::Uuid::new_v4())),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");

    let (status, _) = send(
        &app,
        get(&format!("/api/v1/transactions/{}", uuid::Uuid::new_v4())),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn create_transaction_is_accepted_for_async_recording() {
    let h = Harness::new();
    let wallet = h.seed_wallet("09123000003", 0).await;
    let app = app(&h);

    let (status, body) = send(
        &app,
        post(
            "/api/v1/transactions",
            json!({"wallet_id": wallet.id, "amount": 12, "type": "refund", "idempotency_key": "r-1"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["idempotency_key"], "r-1");
    assert_eq!(h.publisher.messages().len(), 1);

    // nothing is written until the subscriber consumes the event
    assert_eq!(h.store.ledger_len(), 0);
}

#[tokio::test]
async fn health_and_metrics_respond() {
    let h = Harness::new();
    let app = app(&h);

    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let response = app.clone().oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

/// Broker that answers every publish after `delay`.
struct SlowBroker {
    delay: Duration,
    inner: RecordingPublisher,
}

#[async_trait]
impl EventPublisher for SlowBroker {
    async fn publish(
        &self,
        subject: &str,
        payload: Vec<u8>,
        msg_id: Option<&str>,
    ) -> Result<(), AppError> {
        tokio::time::sleep(self.delay).await;
        self.inner.publish(subject, payload, msg_id).await
    }
}

#[tokio::test]
async fn slow_broker_does_not_turn_a_committed_charge_into_a_timeout() {
    let store = MemoryStore::new();
    let broker = Arc::new(SlowBroker {
        delay: Duration::from_millis(150),
        inner: RecordingPublisher::new(),
    });
    broker.inner.fail_next(2);

    let wallets = Arc::new(WalletService::new(
        store.clone(),
        store.clone(),
        Arc::new(MemoryWalletCache::new(Duration::from_secs(3600))),
        broker.clone(),
        Arc::new(RecordingMetrics::new()),
        RetryPolicy {
            attempts: 3,
            delay: Duration::from_millis(50),
        },
    ));
    let app = handlers::router(
        AppState {
            wallets: wallets.clone(),
            transactions: Arc::new(TransactionService::new(
                store.clone(),
                store.clone(),
                broker.clone(),
            )),
            registry: Arc::new(PrometheusMetrics::new().unwrap()),
        },
        Duration::from_millis(300),
    );

    let (status, created) = send(
        &app,
        post("/api/v1/wallet", json!({"mobile": "09120000099", "balance": 100})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let wallet_id: uuid::Uuid = created["id"].as_str().unwrap().parse().unwrap();

    let (status, body) = send(
        &app,
        post("/api/v1/wallet/charge", json!({"mobile": "09120000099", "amount": 50})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["balance"], 150);
    assert_eq!(store.balance_of(wallet_id), Some(150));

    // the event still goes out once the broker recovers
    wallets.drain().await;
    assert_eq!(broker.inner.messages().len(), 1);
}
