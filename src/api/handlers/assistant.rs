use crate::{api::handlers::plain_text, types::Result, AppState};
use axum::{
    body::Body,
    extract::{Query, State},
    response::Response,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct AssistantParams {
    #[serde(default)]
    pub input: Option<String>,
}

/// Ask the Chinook assistant. The body is prose or a PNG data URL.
///
/// Every request starts a fresh conversation.
pub async fn assistant(
    State(state): State<AppState>,
    Query(params): Query<AssistantParams>,
) -> Result<Response> {
    let input = params.input.unwrap_or_default();
    if input.is_empty() {
        return Ok(plain_text(Body::empty()));
    }

    let outcome = state.dispatcher.chat(&input, None).await?;
    tracing::info!(kind = ?outcome.kind, "assistant replied");
    Ok(plain_text(outcome.reply))
}
