//! HTTP edge of the custodial Lightning wallet service.
//!
//! Wraps the payment engine in an lnbits-compatible JSON API: accounts,
//! wallets, invoices, payments, LNURL flows and a server-sent event stream
//! of payment transitions. Requests authenticate with the `X-Api-Key`
//! header.

pub mod auth;
pub mod config;
pub mod error;
pub mod logging;
pub mod routes;
pub mod state;

use std::path::Path;

use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

pub use config::{Config, ConfigError, SiteSettings};
pub use error::ApiError;
pub use state::AppState;

/// Build the complete application.
///
/// With a `static_dir`, unknown paths are served from it, falling back to
/// its `index.html` for client-side routes.
pub fn app(state: AppState, static_dir: Option<&Path>) -> axum::Router {
    let router = routes::router();

    let router = match static_dir {
        Some(dir) => router.fallback_service(
            ServeDir::new(dir).fallback(ServeFile::new(dir.join("index.html"))),
        ),
        None => router,
    };

    router
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
