//! User registration and account routes.

use axum::extract::State;
use axum::Json;
use database::KeyScope;
use payments::{Registration, UserInfo, WalletCredentials};
use serde::{Deserialize, Serialize};

use super::ApiJson;
use crate::auth::Caller;
use crate::error::Result;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct RegisterRequest {
    /// Name of the first wallet.
    #[serde(default)]
    pub wallet_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateWalletRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct AddAppRequest {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct AppsResponse {
    pub apps: Vec<String>,
}

/// Create a user with a first wallet. Needs no key; the body is optional.
pub async fn register(
    State(state): State<AppState>,
    body: Option<ApiJson<RegisterRequest>>,
) -> Result<Json<Registration>> {
    let request = body.map(|ApiJson(request)| request).unwrap_or_default();
    let registration = state
        .accounts
        .register(request.wallet_name.as_deref())
        .await?;
    Ok(Json(registration))
}

pub async fn get_user(State(state): State<AppState>, caller: Caller) -> Result<Json<UserInfo>> {
    caller.require(KeyScope::Invoice)?;
    Ok(Json(state.accounts.user(caller.user_id()).await?))
}

pub async fn create_wallet(
    State(state): State<AppState>,
    caller: Caller,
    ApiJson(request): ApiJson<CreateWalletRequest>,
) -> Result<Json<WalletCredentials>> {
    caller.require(KeyScope::Admin)?;
    let wallet = state
        .accounts
        .create_wallet(caller.user_id(), &request.name)
        .await?;
    Ok(Json(wallet))
}

pub async fn add_app(
    State(state): State<AppState>,
    caller: Caller,
    ApiJson(request): ApiJson<AddAppRequest>,
) -> Result<Json<AppsResponse>> {
    caller.require(KeyScope::Admin)?;
    let apps = state.accounts.add_app(caller.user_id(), &request.url).await?;
    Ok(Json(AppsResponse { apps }))
}
