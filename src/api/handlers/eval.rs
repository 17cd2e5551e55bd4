use crate::{api::handlers::plain_text, llm::streaming::FragmentStream, AppState};
use axum::{body::Body, extract::State, response::Response, Form};
use serde::Deserialize;

/// Reply streamed by the evaluation endpoint until scoring exists.
pub const EVAL_PLACEHOLDER: &str =
    "I'm sorry, but I haven't yet been trained to evaluate candidates.";

#[derive(Debug, Deserialize)]
pub struct EvalForm {
    #[serde(default)]
    pub candidate: Option<String>,
    #[serde(default)]
    pub job: Option<String>,
}

/// Evaluate a resume against a job description.
///
/// The form is accepted and ignored; the body is always [`EVAL_PLACEHOLDER`].
pub async fn eval(State(state): State<AppState>, Form(form): Form<EvalForm>) -> Response {
    tracing::debug!(
        candidate_len = form.candidate.as_deref().map_or(0, str::len),
        job_len = form.job.as_deref().map_or(0, str::len),
        "evaluation requested"
    );

    let source: FragmentStream = Box::new(futures::stream::iter([Ok(EVAL_PLACEHOLDER.to_string())]));
    let stream = state.responder.spawn(source);
    plain_text(Body::from_stream(stream.into_text_stream()))
}
