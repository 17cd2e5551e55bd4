use crate::api::handlers::{assistant, eval, pages, rag};
use crate::AppState;
use axum::{
    Router,
    routing::{get, post},
};

/// Form and query payloads are small
const MAX_BODY_BYTES: usize = 1024 * 1024;

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/", get(pages::index))
        .route("/eval", post(eval::eval))
        .route("/answer", get(rag::answer))
        .route("/assistant", get(assistant::assistant))
        .layer(tower_http::limit::RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
