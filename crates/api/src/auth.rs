//! API key extraction.

use axum::async_trait;
use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use database::KeyScope;
use payments::{Identity, PaymentError};
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::AppState;

/// Header carrying the API key.
pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Deserialize)]
struct KeyQuery {
    #[serde(rename = "api-key")]
    api_key: Option<String>,
}

/// The wallet and scope a request acts as.
///
/// The key comes from the `X-Api-Key` header, or from the `api-key` query
/// parameter for clients that cannot set headers (EventSource).
#[derive(Debug, Clone)]
pub struct Caller(pub Identity);

impl Caller {
    pub fn wallet_id(&self) -> &str {
        &self.0.wallet_id
    }

    pub fn user_id(&self) -> &str {
        &self.0.user_id
    }

    pub fn require(&self, scope: KeyScope) -> Result<(), ApiError> {
        Ok(self.0.require(scope)?)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(API_KEY_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let key = match header {
            Some(key) => key,
            None => Query::<KeyQuery>::try_from_uri(&parts.uri)
                .ok()
                .and_then(|Query(query)| query.api_key)
                .ok_or(PaymentError::Unauthorized)?,
        };

        Ok(Caller(state.access.resolve(&key).await?))
    }
}
