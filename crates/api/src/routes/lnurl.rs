//! LNURL routes.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use database::KeyScope;
use payments::{LoginResult, PaymentView};
use serde::Deserialize;

use super::{ApiJson, ApiPath};
use crate::auth::Caller;
use crate::error::Result;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AuthRequest {
    pub lnurl: String,
}

#[derive(Debug, Deserialize)]
pub struct PayLnurlRequest {
    #[serde(alias = "callback")]
    pub lnurl: String,
    /// Millisatoshis.
    pub amount: u64,
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WithdrawLnurlRequest {
    pub lnurl: String,
    /// Millisatoshis. Defaults to the link's maximum.
    pub amount: Option<u64>,
}

/// Decode and resolve an LNURL without acting on it.
pub async fn scan(
    State(state): State<AppState>,
    caller: Caller,
    ApiPath(code): ApiPath<String>,
) -> Result<Response> {
    caller.require(KeyScope::Invoice)?;
    let request = state.lnurl.scan(&code).await?;
    Ok(Json(request).into_response())
}

pub async fn pay(
    State(state): State<AppState>,
    caller: Caller,
    ApiJson(request): ApiJson<PayLnurlRequest>,
) -> Result<Response> {
    caller.require(KeyScope::Admin)?;
    let result = state
        .lnurl
        .pay(
            caller.wallet_id(),
            &request.lnurl,
            request.amount,
            request.comment.as_deref(),
        )
        .await?;

    let status = if result.payment.is_confirmed() {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    Ok((status, Json(result)).into_response())
}

pub async fn withdraw(
    State(state): State<AppState>,
    caller: Caller,
    ApiJson(request): ApiJson<WithdrawLnurlRequest>,
) -> Result<Json<PaymentView>> {
    caller.require(KeyScope::Admin)?;
    Ok(Json(
        state
            .lnurl
            .withdraw(caller.wallet_id(), &request.lnurl, request.amount)
            .await?,
    ))
}

pub async fn auth(
    State(state): State<AppState>,
    caller: Caller,
    ApiJson(request): ApiJson<AuthRequest>,
) -> Result<Json<LoginResult>> {
    caller.require(KeyScope::Admin)?;
    Ok(Json(
        state.lnurl.auth(caller.wallet_id(), &request.lnurl).await?,
    ))
}
