use std::sync::Arc;
use std::time::Duration;

use api::{AppState, SiteSettings};
use database::Database;
use lightning_backend::{FakeBackend, FakePayBehavior, LightningBackend, Settlement};
use payments::{EngineConfig, PaymentEngine};
use reqwest::StatusCode;
use serde_json::{json, Value};

struct Server {
    base: String,
    http: reqwest::Client,
    engine: PaymentEngine,
    backend: Arc<FakeBackend>,
}

struct Keys {
    wallet_id: String,
    admin: String,
    invoice: String,
}

async fn serve() -> Server {
    let db = Database::in_memory().await.unwrap();
    let backend = Arc::new(FakeBackend::new().unwrap());
    let dyn_backend: Arc<dyn LightningBackend> = backend.clone();
    let config = EngineConfig {
        payment_timeout: Duration::from_millis(200),
        ..EngineConfig::default()
    };
    let engine = PaymentEngine::new(db, dyn_backend, config);

    let site = SiteSettings {
        site_title: "Test Wallets".to_string(),
        ..SiteSettings::default()
    };
    let state = AppState::new(engine.clone(), site).unwrap();
    let app = api::app(state, None);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Server {
        base: format!("http://{addr}"),
        http: reqwest::Client::new(),
        engine,
        backend,
    }
}

impl Server {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn register(&self) -> Keys {
        let body: Value = self
            .http
            .post(self.url("/api/user"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        Keys {
            wallet_id: body["wallet"]["id"].as_str().unwrap().to_string(),
            admin: body["wallet"]["adminkey"].as_str().unwrap().to_string(),
            invoice: body["wallet"]["inkey"].as_str().unwrap().to_string(),
        }
    }

    async fn post(&self, path: &str, key: &str, body: Value) -> (StatusCode, Value) {
        let response = self
            .http
            .post(self.url(path))
            .header("X-Api-Key", key)
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = response.status();
        (status, response.json().await.unwrap())
    }

    async fn get(&self, path: &str, key: &str) -> (StatusCode, Value) {
        let response = self
            .http
            .get(self.url(path))
            .header("X-Api-Key", key)
            .send()
            .await
            .unwrap();
        let status = response.status();
        (status, response.json().await.unwrap())
    }

    async fn fund(&self, keys: &Keys, sat: u64) {
        let (status, invoice) = self
            .post(
                "/api/wallet/create-invoice",
                &keys.invoice,
                json!({"amount": sat, "memo": "funding"}),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        self.engine
            .handle_settlement(Settlement {
                payment_hash: invoice["payment_hash"].as_str().unwrap().to_string(),
                amount_msat: sat * 1000,
                fee_msat: 0,
            })
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_settings() {
    let server = serve().await;
    let body: Value = server
        .http
        .get(server.url("/v/settings"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["site_title"], "Test Wallets");
    assert_eq!(body["lightning_backend"], "fake");
    assert_eq!(body["theme_options"].as_array().unwrap().len(), 6);
    assert!(body["commit"].is_string());
}

#[tokio::test]
async fn test_register_and_read_wallet() {
    let server = serve().await;
    let keys = server.register().await;

    let (status, wallet) = server.get("/api/wallet", &keys.invoice).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(wallet["id"], keys.wallet_id.as_str());
    assert_eq!(wallet["balance_msat"], 0);

    let (status, user) = server.get("/api/user", &keys.admin).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(user["wallets"].as_array().unwrap().len(), 1);

    let (status, wallet) = server
        .post("/api/user/create-wallet", &keys.admin, json!({"name": "Second"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(wallet["name"], "Second");
    assert!(wallet["adminkey"].is_string());
}

#[tokio::test]
async fn test_missing_and_unknown_keys_are_unauthorized() {
    let server = serve().await;

    let response = server
        .http
        .get(server.url("/api/wallet"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Unauthorized");

    let (status, _) = server.get("/api/wallet", &"ab".repeat(32)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_keys_must_match_exactly() {
    let server = serve().await;
    let keys = server.register().await;

    let status_for = |key: String| {
        let request = server
            .http
            .get(server.url("/api/wallet"))
            .query(&[("api-key", key)]);
        async move { request.send().await.unwrap().status() }
    };

    assert_eq!(status_for(keys.invoice.clone()).await, StatusCode::OK);
    assert_eq!(
        status_for(format!(" {}", keys.invoice)).await,
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(
        status_for(format!("{}\t", keys.invoice)).await,
        StatusCode::UNAUTHORIZED
    );
}

#[tokio::test]
async fn test_invoice_key_cannot_pay() {
    let server = serve().await;
    let keys = server.register().await;
    let remote = server.backend.sign_invoice(1_000, "remote", 600).unwrap();

    let (status, body) = server
        .post(
            "/api/wallet/pay-invoice",
            &keys.invoice,
            json!({"payment_request": remote.payment_request}),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Forbidden");
    assert!(server.backend.pay_attempts().is_empty());
}

#[tokio::test]
async fn test_v1_payments_dispatches_on_out() {
    let server = serve().await;
    let payer = server.register().await;
    let payee = server.register().await;
    server.fund(&payer, 50).await;

    let (status, invoice) = server
        .post(
            "/api/v1/payments",
            &payee.invoice,
            json!({"out": false, "amount": 20, "memo": "coffee"}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(invoice["amount_msat"], 20_000);
    let bolt11 = invoice["payment_request"].as_str().unwrap().to_string();
    let hash = invoice["payment_hash"].as_str().unwrap().to_string();

    let (status, paid) = server
        .post(
            "/api/v1/payments",
            &payer.admin,
            json!({"out": true, "bolt11": bolt11}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(paid["status"], "confirmed");
    assert_eq!(paid["internal"], true);

    let (_, payer_wallet) = server.get("/api/v1/wallet", &payer.invoice).await;
    assert_eq!(payer_wallet["balance_msat"], 30_000);

    let (status, payment) = server
        .get(&format!("/api/v1/payments/{hash}"), &payee.invoice)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payment["paid"], true);

    let (status, list) = server.get("/api/v1/payments?limit=10", &payer.invoice).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_pay_error_bodies() {
    let server = serve().await;
    let keys = server.register().await;

    let remote = server.backend.sign_invoice(100_000, "big", 600).unwrap();
    let (status, body) = server
        .post(
            "/api/wallet/pay-invoice",
            &keys.admin,
            json!({"payment_request": remote.payment_request}),
        )
        .await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["error"], "InsufficientBalance");
    assert!(body["message"].is_string());

    let (status, body) = server
        .post(
            "/api/wallet/pay-invoice",
            &keys.admin,
            json!({"payment_request": "lnbc1garbage"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "InvalidPaymentRequest");

    let (status, body) = server
        .post("/api/wallet/create-invoice", &keys.invoice, json!({"memo": "no amount"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "BadRequest");

    let (status, body) = server
        .get(&format!("/api/wallet/payment/{}", "cd".repeat(32)), &keys.invoice)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "NotFound");
}

#[tokio::test]
async fn test_unknown_outcome_is_accepted() {
    let server = serve().await;
    let keys = server.register().await;
    server.fund(&keys, 100).await;

    let remote = server.backend.sign_invoice(10_000, "slow", 600).unwrap();
    server
        .backend
        .set_pay_behavior(&remote.payment_hash, FakePayBehavior::Hang);

    let (status, body) = server
        .post(
            "/api/wallet/pay-invoice",
            &keys.admin,
            json!({"payment_request": remote.payment_request}),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "indeterminate");
}

#[tokio::test]
async fn test_rotate_keys_over_http() {
    let server = serve().await;
    let keys = server.register().await;

    let (status, rotated) = server
        .post("/api/wallet/rotate-keys", &keys.admin, json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(rotated["adminkey"], keys.admin.as_str());

    let (status, _) = server.get("/api/wallet", &keys.admin).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let new_key = rotated["inkey"].as_str().unwrap();
    let (status, _) = server.get("/api/wallet", new_key).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_rename_wallet() {
    let server = serve().await;
    let keys = server.register().await;

    let response = server
        .http
        .put(server.url("/api/v1/wallet/Holidays"))
        .header("X-Api-Key", &keys.admin)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let wallet: Value = response.json().await.unwrap();
    assert_eq!(wallet["name"], "Holidays");
}

#[tokio::test]
async fn test_sse_streams_settlements() {
    let server = serve().await;
    let keys = server.register().await;

    let (_, invoice) = server
        .post(
            "/api/wallet/create-invoice",
            &keys.invoice,
            json!({"amount": 5, "memo": "stream me"}),
        )
        .await;
    let hash = invoice["payment_hash"].as_str().unwrap().to_string();

    let url = server.url(&format!("/api/wallet/sse?api-key={}", keys.invoice));
    let http = server.http.clone();
    let reader = tokio::spawn(async move {
        let mut response = http.get(url).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let mut received = String::new();
        while let Some(chunk) = response.chunk().await.unwrap() {
            received.push_str(&String::from_utf8_lossy(&chunk));
            if received.contains("\"state\":\"settled\"") {
                break;
            }
        }
        received
    });

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while server.engine.notifier().subscriber_count(&keys.wallet_id) == 0 {
        assert!(tokio::time::Instant::now() < deadline, "sse client never subscribed");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    server
        .engine
        .handle_settlement(Settlement {
            payment_hash: hash.clone(),
            amount_msat: 5_000,
            fee_msat: 0,
        })
        .await
        .unwrap();

    let received = tokio::time::timeout(Duration::from_secs(5), reader)
        .await
        .unwrap()
        .unwrap();
    assert!(received.contains("event: payment"));
    assert!(received.contains(&hash));
}
