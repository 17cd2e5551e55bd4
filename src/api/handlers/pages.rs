use axum::response::Html;

const INDEX_HTML: &str = include_str!("../../../static/index.html");

/// Front page with forms for every endpoint
pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}
