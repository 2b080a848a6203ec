//! Site settings.

use axum::extract::State;
use axum::Json;

use crate::state::{AppState, SettingsView};

pub async fn view_settings(State(state): State<AppState>) -> Json<SettingsView> {
    Json(state.settings.as_ref().clone())
}
