//! Server-sent payment events.

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use database::KeyScope;
use tokio_stream::{Stream, StreamExt};
use tracing::debug;

use crate::auth::Caller;
use crate::error::Result;
use crate::state::AppState;

/// Stream the wallet's payment events as `payment` SSE events.
///
/// The stream ends when the server shuts down.
pub async fn sse(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, axum::Error>>>> {
    caller.require(KeyScope::Invoice)?;
    debug!(wallet_id = %caller.wallet_id(), "sse client connected");

    let events = state
        .engine
        .notifier()
        .subscribe(caller.wallet_id())
        .into_stream()
        .map(|event| Event::default().event("payment").json_data(&event));

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
