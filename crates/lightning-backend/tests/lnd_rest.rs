//! LND REST backend against a mock HTTP server.

use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use futures::StreamExt;
use lightning_backend::{
    BackendError, CreateInvoiceParams, FailureReason, InvoiceStatus, LightningBackend, LndBackend,
    LndConfig, PayOutcome, PaymentStatus,
};
use serde_json::json;
use wiremock::{
    matchers::{body_partial_json, header, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

const MACAROON: &str = "0201036c6e64";

fn backend(url: String) -> LndBackend {
    LndBackend::new(LndConfig {
        http_timeout: Duration::from_secs(5),
        ..LndConfig::new(url, MACAROON)
    })
    .unwrap()
}

#[tokio::test]
async fn test_get_info() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/getinfo"))
        .and(header("Grpc-Metadata-macaroon", MACAROON))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "alias": "alice",
            "identity_pubkey": "02abc"
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/balance/channels"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "balance": "12",
            "local_balance": { "sat": "12", "msat": "12345" }
        })))
        .mount(&server)
        .await;

    let info = backend(server.uri()).get_info().await.unwrap();
    assert_eq!(info.alias, "alice");
    assert_eq!(info.pubkey, "02abc");
    assert_eq!(info.balance_msat, 12_345);
}

#[tokio::test]
async fn test_create_invoice_decodes_hash() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/invoices"))
        .and(body_partial_json(json!({ "value_msat": "21000", "memo": "coffee" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "r_hash": "3q2+7w==",
            "payment_request": "lnbcrt210n1...",
            "add_index": "1"
        })))
        .mount(&server)
        .await;

    let invoice = backend(server.uri())
        .create_invoice(CreateInvoiceParams {
            amount_msat: 21_000,
            memo: "coffee".to_string(),
            expiry_secs: 600,
        })
        .await
        .unwrap();

    assert_eq!(invoice.payment_hash, "deadbeef");
    assert_eq!(invoice.payment_request, "lnbcrt210n1...");
}

#[tokio::test]
async fn test_pay_invoice_success() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/channels/transactions"))
        .and(body_partial_json(json!({ "fee_limit": { "fixed_msat": "2000" } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "payment_error": "",
            "payment_preimage": "AAECAw==",
            "payment_route": { "total_fees_msat": "150" }
        })))
        .mount(&server)
        .await;

    let outcome = backend(server.uri())
        .pay_invoice("lnbcrt1...", 2_000)
        .await
        .unwrap();

    assert_eq!(
        outcome,
        PayOutcome::Succeeded {
            preimage: "00010203".to_string(),
            fee_msat: 150
        }
    );
}

#[tokio::test]
async fn test_pay_invoice_route_failure() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/channels/transactions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "payment_error": "unable to find a path to destination",
            "payment_preimage": ""
        })))
        .mount(&server)
        .await;

    let outcome = backend(server.uri())
        .pay_invoice("lnbcrt1...", 2_000)
        .await
        .unwrap();

    assert_eq!(outcome, PayOutcome::Failed(FailureReason::RouteNotFound));
}

#[tokio::test]
async fn test_pay_invoice_server_error_is_ambiguous() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/channels/transactions"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "code": 2,
            "message": "internal error"
        })))
        .mount(&server)
        .await;

    let result = backend(server.uri()).pay_invoice("lnbcrt1...", 2_000).await;
    assert!(matches!(result, Err(ref e) if !e.is_definite()));
}

#[tokio::test]
async fn test_unreachable_node_is_definite() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let result = backend(url).pay_invoice("lnbcrt1...", 2_000).await;
    assert!(matches!(result, Err(BackendError::Unavailable(_))));
}

fn track_path(payment_hash: &str) -> String {
    let hash = hex::decode(payment_hash).unwrap();
    format!("/v2/router/track/{}", URL_SAFE.encode(hash))
}

#[tokio::test]
async fn test_lookup_payment() {
    let server = MockServer::start().await;
    let succeeded = "aa".repeat(32);
    let failed = "cc".repeat(32);
    let in_flight = "dd".repeat(32);
    let missing = "ee".repeat(32);
    let not_initiated = "ff".repeat(32);

    let track = |payment_hash: &str, body: serde_json::Value| {
        Mock::given(method("GET"))
            .and(path(track_path(payment_hash)))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!("{body}\n")))
    };
    track(
        &succeeded,
        json!({"result": {"payment_preimage": "bb", "fee_msat": "12", "status": "SUCCEEDED"}}),
    )
    .mount(&server)
    .await;
    track(
        &failed,
        json!({"result": {"status": "FAILED", "failure_reason": "FAILURE_REASON_NO_ROUTE"}}),
    )
    .mount(&server)
    .await;
    track(&in_flight, json!({"result": {"status": "IN_FLIGHT"}}))
        .mount(&server)
        .await;
    track(
        &not_initiated,
        json!({"error": {"code": 5, "message": "payment isn't initiated"}}),
    )
    .mount(&server)
    .await;
    Mock::given(method("GET"))
        .and(path(track_path(&missing)))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"code": 5, "message": "not found"})))
        .mount(&server)
        .await;

    let lnd = backend(server.uri());
    assert_eq!(
        lnd.lookup_payment(&succeeded).await.unwrap(),
        PaymentStatus::Succeeded {
            preimage: "bb".to_string(),
            fee_msat: 12
        }
    );
    assert_eq!(
        lnd.lookup_payment(&failed).await.unwrap(),
        PaymentStatus::Failed(FailureReason::RouteNotFound)
    );
    assert_eq!(lnd.lookup_payment(&in_flight).await.unwrap(), PaymentStatus::Pending);
    assert_eq!(lnd.lookup_payment(&missing).await.unwrap(), PaymentStatus::Unknown);
    assert_eq!(lnd.lookup_payment(&not_initiated).await.unwrap(), PaymentStatus::Unknown);
    assert_eq!(lnd.lookup_payment("not-hex").await.unwrap(), PaymentStatus::Unknown);

    // Only the one payment is fetched, never the node's whole history.
    let requests = server.received_requests().await.unwrap();
    assert!(requests.iter().all(|r| r.url.path().starts_with("/v2/router/track/")));
}

#[tokio::test]
async fn test_lookup_invoice() {
    let server = MockServer::start().await;
    let settled = "11".repeat(32);
    let open = "22".repeat(32);
    let canceled = "33".repeat(32);
    let missing = "44".repeat(32);

    for (payment_hash, body) in [
        (&settled, json!({"state": "SETTLED", "settled": true, "amt_paid_msat": "21000"})),
        (&open, json!({"state": "OPEN", "amt_paid_msat": "0"})),
        (&canceled, json!({"state": "CANCELED"})),
    ] {
        Mock::given(method("GET"))
            .and(path(format!("/v1/invoice/{payment_hash}")))
            .and(header("Grpc-Metadata-macaroon", MACAROON))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path(format!("/v1/invoice/{missing}")))
        .respond_with(
            ResponseTemplate::new(404)
                .set_body_json(json!({"code": 5, "message": "unable to locate invoice"})),
        )
        .mount(&server)
        .await;

    let lnd = backend(server.uri());
    assert_eq!(
        lnd.lookup_invoice(&settled).await.unwrap(),
        InvoiceStatus::Settled { amount_msat: 21_000 }
    );
    assert_eq!(lnd.lookup_invoice(&open).await.unwrap(), InvoiceStatus::Open);
    assert_eq!(lnd.lookup_invoice(&canceled).await.unwrap(), InvoiceStatus::Canceled);
    assert_eq!(lnd.lookup_invoice(&missing).await.unwrap(), InvoiceStatus::Unknown);
    assert_eq!(lnd.lookup_invoice("../getinfo").await.unwrap(), InvoiceStatus::Unknown);
}

#[tokio::test]
async fn test_settlement_stream_resumes_from_settle_index() {
    let server = MockServer::start().await;

    // First connection delivers one settlement, then the stream drops.
    Mock::given(method("GET"))
        .and(path("/v1/invoices/subscribe"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"result":{"r_hash":"AAECAw==","state":"SETTLED","amt_paid_msat":"1000","settle_index":"7"}}"#.to_string() + "\n",
        ))
        .up_to_n_times(1)
        .with_priority(2)
        .mount(&server)
        .await;

    // The reconnect asks for everything after index 7.
    Mock::given(method("GET"))
        .and(path("/v1/invoices/subscribe"))
        .and(query_param("settle_index", "7"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"result":{"r_hash":"CAkKCw==","state":"SETTLED","amt_paid_msat":"2000","settle_index":"8"}}"#.to_string() + "\n",
        ))
        .with_priority(1)
        .mount(&server)
        .await;

    let lnd = backend(server.uri());
    let settlements: Vec<_> = tokio::time::timeout(
        Duration::from_secs(5),
        lnd.subscribe_settlements().unwrap().take(2).collect::<Vec<_>>(),
    )
    .await
    .expect("both settlements delivered");

    assert_eq!(settlements[0].payment_hash, "00010203");
    assert_eq!(settlements[1].payment_hash, "08090a0b");
    assert_eq!(settlements[1].amount_msat, 2_000);

    let requests = server.received_requests().await.unwrap();
    let settle_index = |i: usize| {
        requests[i]
            .url
            .query_pairs()
            .find(|(k, _)| k == "settle_index")
            .map(|(_, v)| v.into_owned())
    };
    assert_eq!(settle_index(0), None);
    assert_eq!(settle_index(1).as_deref(), Some("7"));
}

#[tokio::test]
async fn test_settlement_stream() {
    let server = MockServer::start().await;

    let body = [
        r#"{"result":{"r_hash":"AAECAw==","state":"SETTLED","amt_paid_msat":"1000"}}"#,
        r#"{"result":{"r_hash":"BAUGBw==","state":"OPEN"}}"#,
        r#"{"result":{"r_hash":"CAkKCw==","state":"SETTLED","amt_paid_msat":"2000"}}"#,
    ]
    .join("\n")
        + "\n";

    Mock::given(method("GET"))
        .and(path("/v1/invoices/subscribe"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let lnd = backend(server.uri());
    let settlements: Vec<_> = lnd.subscribe_settlements().unwrap().take(2).collect().await;

    assert_eq!(settlements[0].payment_hash, "00010203");
    assert_eq!(settlements[0].amount_msat, 1_000);
    assert_eq!(settlements[1].payment_hash, "08090a0b");
    assert_eq!(settlements[1].amount_msat, 2_000);

    assert!(matches!(
        lnd.subscribe_settlements(),
        Err(BackendError::AlreadySubscribed)
    ));
}
