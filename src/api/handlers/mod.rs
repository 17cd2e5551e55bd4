//! API request handlers.

/// Chinook assistant handler.
pub mod assistant;
/// Resume evaluation placeholder.
pub mod eval;
/// Static front page.
pub mod pages;
/// Retrieval-augmented answering.
pub mod rag;

use axum::body::Body;
use axum::http::header;
use axum::response::{IntoResponse, Response};

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

/// 200 with a plain-text body
pub(crate) fn plain_text(body: impl Into<Body>) -> Response {
    ([(header::CONTENT_TYPE, TEXT_PLAIN)], body.into()).into_response()
}
