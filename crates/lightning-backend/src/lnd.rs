//! LND REST backend.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::LndConfig;
use crate::error::{BackendError, Result};
use crate::{
    CreateInvoiceParams, CreatedInvoice, FailureReason, InvoiceStatus, LightningBackend, NodeInfo,
    PayOutcome, PaymentStatus, Settlement, SettlementStream,
};

const MACAROON_HEADER: &str = "Grpc-Metadata-macaroon";
const RECONNECT_INITIAL_DELAY: Duration = Duration::from_secs(1);
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Backend for an LND node over its REST interface.
pub struct LndBackend {
    http: Client,
    stream_http: Client,
    config: LndConfig,
    subscribed: AtomicBool,
}

impl LndBackend {
    pub fn new(config: LndConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.http_timeout)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()?;

        // The invoice subscription is a long-lived response with no overall deadline.
        let stream_http = Client::builder()
            .connect_timeout(config.http_timeout)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()?;

        Ok(Self {
            http,
            stream_http,
            config,
            subscribed: AtomicBool::new(false),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.config.url, path)
    }

    fn router_url(&self, path: &str) -> String {
        format!("{}/v2/router/{}", self.config.url, path)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send(self.http.get(self.url(path))).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        self.send(self.http.post(self.url(path)).json(body)).await
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = self.execute(request).await?;
        Ok(check_status(response).await?.json().await?)
    }

    async fn execute(&self, request: RequestBuilder) -> Result<Response> {
        request
            .header(MACAROON_HEADER, &self.config.macaroon_hex)
            .send()
            .await
            .map_err(map_send_error)
    }
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<LndErrorBody>(&body)
        .map(|e| e.message)
        .unwrap_or(body);
    if status.is_client_error() {
        return Err(BackendError::InvalidPaymentRequest(format!("{status}: {message}")));
    }
    Err(BackendError::Protocol(format!("{status}: {message}")))
}

/// LND answers lookups of hashes it never saw with NotFound (gRPC code 5).
fn is_not_found(status: StatusCode, error: Option<&LndErrorBody>) -> bool {
    status == StatusCode::NOT_FOUND
        || error.is_some_and(|e| {
            e.code == 5
                || e.message.contains("unable to locate invoice")
                || e.message.contains("isn't initiated")
        })
}

/// Read the first newline-delimited JSON message of a streamed response.
async fn first_message(response: Response) -> Result<Vec<u8>> {
    let mut body = response.bytes_stream();
    let mut buffer = Vec::new();
    while let Some(chunk) = body.next().await {
        buffer.extend_from_slice(&chunk?);
        if let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
            buffer.truncate(pos);
            break;
        }
    }
    Ok(buffer)
}

fn is_hex_hash(payment_hash: &str) -> bool {
    !payment_hash.is_empty() && payment_hash.chars().all(|c| c.is_ascii_hexdigit())
}

fn map_send_error(e: reqwest::Error) -> BackendError {
    if e.is_connect() {
        BackendError::Unavailable(e.to_string())
    } else {
        BackendError::Http(e)
    }
}

fn decode_bytes(value: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(value)
        .or_else(|_| URL_SAFE.decode(value))
        .map_err(|e| BackendError::Protocol(format!("invalid base64 from node: {e}")))
}

fn parse_msat(value: &str) -> u64 {
    value.parse().unwrap_or(0)
}

#[async_trait]
impl LightningBackend for LndBackend {
    fn name(&self) -> &str {
        "lnd"
    }

    async fn get_info(&self) -> Result<NodeInfo> {
        let info: LndGetInfo = self.get("getinfo").await?;
        let balance: LndChannelBalance = self.get("balance/channels").await?;

        let balance_msat = balance
            .local_balance
            .map(|b| parse_msat(&b.msat))
            .unwrap_or_else(|| parse_msat(&balance.balance) * 1000);

        Ok(NodeInfo {
            alias: info.alias,
            pubkey: info.identity_pubkey,
            balance_msat,
        })
    }

    async fn create_invoice(&self, params: CreateInvoiceParams) -> Result<CreatedInvoice> {
        let request = LndInvoiceRequest {
            value_msat: params.amount_msat.to_string(),
            memo: params.memo,
            expiry: params.expiry_secs.to_string(),
        };

        let response: LndAddInvoiceResponse = self.post("invoices", &request).await?;
        let payment_hash = hex::encode(decode_bytes(&response.r_hash)?);

        debug!(payment_hash = %payment_hash, "lnd invoice created");

        Ok(CreatedInvoice {
            payment_hash,
            payment_request: response.payment_request,
            expires_at: chrono::Utc::now().timestamp() + params.expiry_secs as i64,
        })
    }

    async fn pay_invoice(&self, payment_request: &str, max_fee_msat: u64) -> Result<PayOutcome> {
        let request = LndPayRequest {
            payment_request: payment_request.to_string(),
            fee_limit: LndFeeLimit {
                fixed_msat: max_fee_msat.to_string(),
            },
        };

        let response: LndPayResponse = match self.post("channels/transactions", &request).await {
            Ok(response) => response,
            Err(BackendError::InvalidPaymentRequest(message)) => {
                warn!("lnd refused payment: {}", message);
                return Ok(PayOutcome::Failed(FailureReason::Rejected));
            }
            Err(e) => return Err(e),
        };

        if !response.payment_error.is_empty() {
            return Ok(PayOutcome::Failed(FailureReason::from_message(
                &response.payment_error,
            )));
        }

        if response.payment_preimage.is_empty() {
            return Err(BackendError::Protocol(
                "payment returned neither preimage nor error".to_string(),
            ));
        }

        Ok(PayOutcome::Succeeded {
            preimage: hex::encode(decode_bytes(&response.payment_preimage)?),
            fee_msat: response
                .payment_route
                .map(|route| parse_msat(&route.total_fees_msat))
                .unwrap_or(0),
        })
    }

    async fn lookup_payment(&self, payment_hash: &str) -> Result<PaymentStatus> {
        let Ok(hash) = hex::decode(payment_hash) else {
            return Ok(PaymentStatus::Unknown);
        };

        // The first message of a track stream is the payment's current state.
        let url = self.router_url(&format!("track/{}", URL_SAFE.encode(hash)));
        let response = self.execute(self.http.get(url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(PaymentStatus::Unknown);
        }
        let message = first_message(check_status(response).await?).await?;
        if message.is_empty() {
            return Ok(PaymentStatus::Unknown);
        }

        let update: LndTrackUpdate = serde_json::from_slice(&message)
            .map_err(|e| BackendError::Protocol(format!("unparsable payment update: {e}")))?;
        if let Some(error) = update.error {
            if is_not_found(StatusCode::OK, Some(&error)) {
                return Ok(PaymentStatus::Unknown);
            }
            return Err(BackendError::Protocol(error.message));
        }
        let Some(payment) = update.result else {
            return Ok(PaymentStatus::Unknown);
        };

        Ok(match payment.status.as_str() {
            "SUCCEEDED" => PaymentStatus::Succeeded {
                preimage: payment.payment_preimage,
                fee_msat: parse_msat(&payment.fee_msat),
            },
            "FAILED" => PaymentStatus::Failed(FailureReason::from_message(&payment.failure_reason)),
            "IN_FLIGHT" | "INITIATED" => PaymentStatus::Pending,
            _ => PaymentStatus::Unknown,
        })
    }

    async fn lookup_invoice(&self, payment_hash: &str) -> Result<InvoiceStatus> {
        if !is_hex_hash(payment_hash) {
            return Ok(InvoiceStatus::Unknown);
        }

        let response = self
            .execute(self.http.get(self.url(&format!("invoice/{payment_hash}"))))
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let error = serde_json::from_str::<LndErrorBody>(&body).ok();
            if is_not_found(status, error.as_ref()) {
                return Ok(InvoiceStatus::Unknown);
            }
            let message = error.map(|e| e.message).unwrap_or(body);
            return Err(BackendError::Protocol(format!("{status}: {message}")));
        }

        let invoice: LndInvoice = response.json().await?;
        Ok(match invoice.state.as_str() {
            "SETTLED" => InvoiceStatus::Settled {
                amount_msat: parse_msat(&invoice.amt_paid_msat),
            },
            "CANCELED" => InvoiceStatus::Canceled,
            _ if invoice.settled => InvoiceStatus::Settled {
                amount_msat: parse_msat(&invoice.amt_paid_msat),
            },
            _ => InvoiceStatus::Open,
        })
    }

    fn subscribe_settlements(&self) -> Result<SettlementStream> {
        if self.subscribed.swap(true, Ordering::SeqCst) {
            return Err(BackendError::AlreadySubscribed);
        }

        let state = Subscription {
            http: self.stream_http.clone(),
            url: self.url("invoices/subscribe"),
            macaroon_hex: self.config.macaroon_hex.clone(),
            body: None,
            buffer: Vec::new(),
            attempt: 0,
            settle_index: 0,
        };

        Ok(Box::pin(stream::unfold(state, |mut state| async move {
            let settlement = state.next_settlement().await;
            Some((settlement, state))
        })))
    }
}

/// Reconnecting reader over LND's newline-delimited invoice updates.
struct Subscription {
    http: Client,
    url: String,
    macaroon_hex: String,
    body: Option<BoxStream<'static, reqwest::Result<Vec<u8>>>>,
    buffer: Vec<u8>,
    attempt: u32,
    /// Highest settle index seen. Sent on reconnect so LND replays what we missed.
    settle_index: u64,
}

impl Subscription {
    async fn next_settlement(&mut self) -> Settlement {
        loop {
            if let Some(settlement) = self.next_buffered() {
                return settlement;
            }

            let Some(body) = self.body.as_mut() else {
                self.connect().await;
                continue;
            };

            match body.next().await {
                Some(Ok(chunk)) => self.buffer.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    warn!("lnd invoice stream error: {}", e);
                    self.body = None;
                }
                None => {
                    warn!("lnd invoice stream ended, reconnecting");
                    self.body = None;
                }
            }
        }
    }

    fn next_buffered(&mut self) -> Option<Settlement> {
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some((settlement, settle_index)) = parse_update(&line) {
                self.settle_index = self.settle_index.max(settle_index);
                return Some(settlement);
            }
        }
        None
    }

    async fn connect(&mut self) {
        if self.attempt > 0 {
            let delay = RECONNECT_INITIAL_DELAY
                .saturating_mul(2u32.saturating_pow(self.attempt - 1))
                .min(RECONNECT_MAX_DELAY);
            tokio::time::sleep(delay).await;
        }
        self.attempt = self.attempt.saturating_add(1);
        self.buffer.clear();

        let mut request = self
            .http
            .get(&self.url)
            .header(MACAROON_HEADER, &self.macaroon_hex);
        if self.settle_index > 0 {
            request = request.query(&[("settle_index", self.settle_index)]);
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                info!(settle_index = self.settle_index, "Subscribed to lnd invoice updates");
                self.attempt = 0;
                self.body = Some(
                    response
                        .bytes_stream()
                        .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
                        .boxed(),
                );
            }
            Ok(response) => warn!("lnd invoice subscription refused: {}", response.status()),
            Err(e) => warn!("lnd invoice subscription failed: {}", e),
        }
    }
}

fn parse_update(line: &[u8]) -> Option<(Settlement, u64)> {
    let text = std::str::from_utf8(line).ok()?.trim();
    if text.is_empty() {
        return None;
    }

    let update: LndInvoiceUpdate = match serde_json::from_str(text) {
        Ok(update) => update,
        Err(e) => {
            warn!("unparsable lnd invoice update: {}", e);
            return None;
        }
    };

    let invoice = update.result?;
    if invoice.state != "SETTLED" && !invoice.settled {
        return None;
    }

    let hash = decode_bytes(&invoice.r_hash).ok()?;
    let settlement = Settlement {
        payment_hash: hex::encode(hash),
        amount_msat: parse_msat(&invoice.amt_paid_msat),
        fee_msat: 0,
    };
    Some((settlement, parse_msat(&invoice.settle_index)))
}

// LND REST API types

#[derive(Deserialize)]
struct LndErrorBody {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct LndGetInfo {
    #[serde(default)]
    alias: String,
    #[serde(default)]
    identity_pubkey: String,
}

#[derive(Deserialize)]
struct LndChannelBalance {
    #[serde(default)]
    balance: String,
    local_balance: Option<LndAmount>,
}

#[derive(Deserialize)]
struct LndAmount {
    #[serde(default)]
    msat: String,
}

#[derive(Serialize)]
struct LndInvoiceRequest {
    value_msat: String,
    memo: String,
    expiry: String,
}

#[derive(Deserialize)]
struct LndAddInvoiceResponse {
    r_hash: String,
    payment_request: String,
}

#[derive(Serialize)]
struct LndPayRequest {
    payment_request: String,
    fee_limit: LndFeeLimit,
}

#[derive(Serialize)]
struct LndFeeLimit {
    fixed_msat: String,
}

#[derive(Deserialize)]
struct LndPayResponse {
    #[serde(default)]
    payment_error: String,
    #[serde(default)]
    payment_preimage: String,
    payment_route: Option<LndRoute>,
}

#[derive(Deserialize)]
struct LndRoute {
    #[serde(default)]
    total_fees_msat: String,
}

#[derive(Deserialize)]
struct LndTrackUpdate {
    result: Option<LndPayment>,
    error: Option<LndErrorBody>,
}

#[derive(Deserialize)]
struct LndPayment {
    #[serde(default)]
    payment_preimage: String,
    #[serde(default)]
    fee_msat: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    failure_reason: String,
}

#[derive(Deserialize)]
struct LndInvoiceUpdate {
    result: Option<LndInvoice>,
}

#[derive(Deserialize)]
struct LndInvoice {
    #[serde(default)]
    r_hash: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    settled: bool,
    #[serde(default)]
    amt_paid_msat: String,
    #[serde(default)]
    settle_index: String,
}
