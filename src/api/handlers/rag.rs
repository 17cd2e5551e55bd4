use crate::{api::handlers::plain_text, types::Result, AppState};
use axum::{
    body::Body,
    extract::{Query, State},
    response::Response,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct AnswerParams {
    #[serde(default)]
    pub query: Option<String>,
}

/// Answer a question from the indexed documents, streamed as plain text.
///
/// A missing or empty `query` yields an empty 200 body.
pub async fn answer(
    State(state): State<AppState>,
    Query(params): Query<AnswerParams>,
) -> Result<Response> {
    let query = params.query.unwrap_or_default();

    match state.retrieval.answer_stream(&query).await? {
        Some(stream) => Ok(plain_text(Body::from_stream(stream.into_text_stream()))),
        None => Ok(plain_text(Body::empty())),
    }
}
