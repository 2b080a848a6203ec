//! Invoice and payment routes.

use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use database::KeyScope;
use payments::{PayResult, PaymentError, PaymentView};
use serde::Deserialize;
use tracing::info;

use super::{ApiJson, ApiPath, ApiQuery};
use crate::auth::Caller;
use crate::error::Result;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateInvoiceRequest {
    /// Satoshis. Zero means "any amount".
    pub amount: u64,
    #[serde(default)]
    pub memo: String,
    /// Seconds.
    pub expiry: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PayInvoiceRequest {
    #[serde(alias = "bolt11")]
    pub payment_request: String,
}

/// Body of `POST /api/v1/payments`: an invoice to create, or with
/// `out: true` an invoice to pay.
#[derive(Debug, Deserialize)]
pub struct PaymentsRequest {
    #[serde(default)]
    pub out: bool,
    /// Satoshis, for `out: false`.
    pub amount: Option<u64>,
    #[serde(default)]
    pub memo: String,
    pub expiry: Option<u64>,
    #[serde(alias = "bolt11")]
    pub payment_request: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
}

pub async fn create_invoice(
    State(state): State<AppState>,
    caller: Caller,
    ApiJson(request): ApiJson<CreateInvoiceRequest>,
) -> Result<Response> {
    create(&state, &caller, request).await
}

pub async fn pay_invoice(
    State(state): State<AppState>,
    caller: Caller,
    ApiJson(request): ApiJson<PayInvoiceRequest>,
) -> Result<Response> {
    pay(&state, &caller, &request.payment_request).await
}

/// Single-path create-or-pay, chosen by `out`. The body is parsed once.
pub async fn dispatch(
    State(state): State<AppState>,
    caller: Caller,
    ApiJson(request): ApiJson<PaymentsRequest>,
) -> Result<Response> {
    if request.out {
        let payment_request = request.payment_request.ok_or_else(|| {
            PaymentError::InvalidPaymentRequest("bolt11 is required when out is true".to_string())
        })?;
        pay(&state, &caller, &payment_request).await
    } else {
        let amount = request
            .amount
            .ok_or_else(|| PaymentError::InvalidAmount("amount is required".to_string()))?;
        let create_request = CreateInvoiceRequest {
            amount,
            memo: request.memo,
            expiry: request.expiry,
        };
        create(&state, &caller, create_request).await
    }
}

pub async fn get_payment(
    State(state): State<AppState>,
    caller: Caller,
    ApiPath(payment_hash): ApiPath<String>,
) -> Result<Json<PaymentView>> {
    caller.require(KeyScope::Invoice)?;
    Ok(Json(
        state
            .engine
            .payment(caller.wallet_id(), &payment_hash)
            .await?,
    ))
}

pub async fn list_payments(
    State(state): State<AppState>,
    caller: Caller,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> Result<Json<Vec<PaymentView>>> {
    caller.require(KeyScope::Invoice)?;
    Ok(Json(
        state
            .engine
            .list_payments(caller.wallet_id(), query.limit)
            .await?,
    ))
}

async fn create(state: &AppState, caller: &Caller, request: CreateInvoiceRequest) -> Result<Response> {
    caller.require(KeyScope::Invoice)?;

    let amount_msat = request
        .amount
        .checked_mul(1000)
        .ok_or_else(|| PaymentError::InvalidAmount(format!("{} sat is too large", request.amount)))?;
    let expiry = request.expiry.map(Duration::from_secs);

    let invoice = state
        .engine
        .create_invoice(caller.wallet_id(), amount_msat, &request.memo, expiry)
        .await?;
    Ok((StatusCode::CREATED, Json(invoice)).into_response())
}

async fn pay(state: &AppState, caller: &Caller, payment_request: &str) -> Result<Response> {
    caller.require(KeyScope::Admin)?;
    let result = state
        .engine
        .pay_invoice(caller.wallet_id(), payment_request)
        .await?;
    Ok(pay_response(result))
}

/// 200 when confirmed, 202 when the outcome is still unknown.
fn pay_response(result: PayResult) -> Response {
    let status = if result.is_confirmed() {
        StatusCode::OK
    } else {
        info!(payment_hash = %result.payment_hash, "payment accepted, outcome pending");
        StatusCode::ACCEPTED
    };
    (status, Json(result)).into_response()
}
