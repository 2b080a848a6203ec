//! Route handlers.

pub mod events;
pub mod lnurl;
pub mod payments;
pub mod settings;
pub mod user;
pub mod wallet;

use axum::extract::{FromRequest, FromRequestParts, Path, Query};
use axum::routing::{get, post, put};
use axum::Router;

use crate::error::ApiError;
use crate::state::AppState;

/// JSON body whose rejection renders as an [`ApiError`].
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// Query string whose rejection renders as an [`ApiError`].
#[derive(FromRequestParts)]
#[from_request(via(Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

/// Path parameters whose rejection renders as an [`ApiError`].
#[derive(FromRequestParts)]
#[from_request(via(Path), rejection(ApiError))]
pub struct ApiPath<T>(pub T);

/// Build the router with all routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v/settings", get(settings::view_settings))
        // Accounts
        .route("/api/user", get(user::get_user).post(user::register))
        .route("/api/user/create-wallet", post(user::create_wallet))
        .route("/api/user/add-app", post(user::add_app))
        // Wallet
        .route("/api/wallet", get(wallet::get_wallet))
        .route(
            "/api/wallet/rename/:name",
            post(wallet::rename_wallet).put(wallet::rename_wallet),
        )
        .route("/api/wallet/rotate-keys", post(wallet::rotate_keys))
        .route("/api/wallet/create-invoice", post(payments::create_invoice))
        .route("/api/wallet/pay-invoice", post(payments::pay_invoice))
        .route("/api/wallet/payment/:id", get(payments::get_payment))
        .route("/api/wallet/payments", get(payments::list_payments))
        .route("/api/wallet/lnurlauth", post(lnurl::auth))
        .route("/api/wallet/pay-lnurl", post(lnurl::pay))
        .route("/api/wallet/withdraw-lnurl", post(lnurl::withdraw))
        .route("/api/wallet/lnurlscan/:code", get(lnurl::scan))
        .route("/api/wallet/sse", get(events::sse))
        // lnbits compatibility
        .route("/api/v1/wallet", get(wallet::get_wallet))
        .route(
            "/api/v1/wallet/:name",
            put(wallet::rename_wallet).post(wallet::rename_wallet),
        )
        .route(
            "/api/v1/payments",
            get(payments::list_payments).post(payments::dispatch),
        )
        .route("/api/v1/payments/lnurl", post(lnurl::pay))
        .route("/api/v1/payments/sse", get(events::sse))
        .route("/api/v1/payments/:id", get(payments::get_payment))
}
