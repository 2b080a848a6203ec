//! Wallet routes.

use axum::extract::State;
use axum::Json;
use database::KeyScope;
use payments::{WalletCredentials, WalletInfo};

use super::ApiPath;
use crate::auth::Caller;
use crate::error::Result;
use crate::state::AppState;

pub async fn get_wallet(State(state): State<AppState>, caller: Caller) -> Result<Json<WalletInfo>> {
    caller.require(KeyScope::Invoice)?;
    Ok(Json(state.accounts.wallet(caller.wallet_id()).await?))
}

pub async fn rename_wallet(
    State(state): State<AppState>,
    caller: Caller,
    ApiPath(name): ApiPath<String>,
) -> Result<Json<WalletInfo>> {
    caller.require(KeyScope::Admin)?;
    Ok(Json(
        state.accounts.rename_wallet(caller.wallet_id(), &name).await?,
    ))
}

/// Replace both keys. The calling key stops working.
pub async fn rotate_keys(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<WalletCredentials>> {
    caller.require(KeyScope::Admin)?;
    Ok(Json(state.accounts.rotate_keys(caller.wallet_id()).await?))
}
