//! Tool dispatch for the Chinook assistant.
//!
//! One dispatch cycle:
//!
//! ```text
//! AwaitingDecision ──(no tool calls)──────────────────────────────► Done
//!        │
//!        ├──► ExecutingTools ──► AwaitingFollowup ────────────────► Done
//!        │          │
//!        └──────────┴──► ExecutingVisualTool ─────────────────────► Done
//! ```
//!
//! Tool calls run sequentially in the order the model sent them. A visual
//! call is terminal: its data URL becomes the reply and any calls after it
//! in the same batch never run. They still get a [`NOT_EXECUTED`] result so
//! the conversation stays replayable. Only when the batch is all textual
//! does a follow-up model call turn the function results into prose.

use crate::db::chinook::QueryExecutor;
use crate::llm::{GenerationOptions, LLMClient};
use crate::tools::capability::{tool_definitions, Capability, ANSWER_TEXTUALLY, ANSWER_VISUALLY};
use crate::tools::chart::ChartGenerator;
use crate::tools::sandbox::CodeRunner;
use crate::tools::text2sql::SqlTranslator;
use crate::types::{AppError, ChatMessage, Result};
use std::sync::Arc;

/// System instructions opening every fresh conversation.
pub const ASSISTANT_INSTRUCTIONS: &str = r#"You are a helpful assistant who can answer questions and generate charts and graphs
from the Chinook database. The database contains information about the Chinook digital
media store. It contains tables with information about customers, invoices, employees,
artists, and more. The data schema supports scenarios like querying customer purchase
history, exploring music genres, managing playlists, and handling employee reporting
structures. The database contains the following tables:

employees - Information about employees of Chinook
customers - Information about customers who purchase Chinook products
invoices - Information about invoices, including customer and invoice date
invoice_items - Line items for invoices in the "invoices" table
artists - Information about artists in the Chinook catalog
media_types - Media types such as MPEG audio and AAC audio
genres - Stores music genres such as rock, metal, and jazz
albums - Stores albums, which are collections of tracks
tracks - Tracks for the albums in the "albums" table
playlists - Stores playlists, which are collections of playlist tracks
playlist_tracks - Tracks for the playlists in the "playlists" table

Only answer questions that can be answered by querying the database. If asked a
question that can't be answered by a database query, say "I don't know." Do not
use markdown formatting."#;

/// Function result recorded for a visual call; the image itself is the reply
pub const CHART_RENDERED: &str = "Chart rendered and returned to the user.";

/// Function result recorded for calls cut short by a visual answer
pub const NOT_EXECUTED: &str = "Not executed: a visual answer already ended this turn.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    AwaitingDecision,
    ExecutingTools,
    ExecutingVisualTool,
    AwaitingFollowup,
    Done,
}

/// How the reply was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    /// The model answered without tools
    Direct,
    /// Textual tool results folded into a follow-up answer
    Textual,
    /// A `data:image/png;base64,...` URL
    Visual,
}

/// Result of one dispatch cycle
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    /// Content of the final assistant message
    pub reply: String,
    pub kind: ReplyKind,
    /// The whole conversation, ending with the reply
    pub conversation: Vec<ChatMessage>,
    /// States visited, in order
    pub states: Vec<DispatchState>,
}

pub struct ToolDispatcher {
    llm: Arc<dyn LLMClient>,
    translator: SqlTranslator,
    executor: Arc<dyn QueryExecutor>,
    charts: ChartGenerator,
}

impl ToolDispatcher {
    /// Dispatcher whose decision, translation and chart calls all use `llm`.
    pub fn new(
        llm: Arc<dyn LLMClient>,
        executor: Arc<dyn QueryExecutor>,
        runner: Arc<dyn CodeRunner>,
    ) -> Self {
        Self {
            translator: SqlTranslator::new(Arc::clone(&llm)),
            charts: ChartGenerator::new(Arc::clone(&llm), runner),
            llm,
            executor,
        }
    }

    /// Run one dispatch cycle for `input`.
    ///
    /// With no `history` (or an empty one) the conversation starts from the
    /// system instructions. An unknown tool name fails with
    /// [`AppError::ToolContract`] before any tool in the batch runs.
    pub async fn chat(
        &self,
        input: &str,
        history: Option<Vec<ChatMessage>>,
    ) -> Result<DispatchOutcome> {
        let mut messages = match history {
            Some(history) if !history.is_empty() => history,
            _ => vec![ChatMessage::system(ASSISTANT_INSTRUCTIONS)],
        };
        messages.push(ChatMessage::user(input));

        let mut states = vec![DispatchState::AwaitingDecision];

        let response = self
            .llm
            .chat(&messages, &GenerationOptions::with_tools(tool_definitions()))
            .await?;

        if response.tool_calls.is_empty() {
            tracing::debug!("model answered without tools");
            messages.push(ChatMessage::assistant(response.content.clone()));
            return Ok(finish(response.content, ReplyKind::Direct, messages, states));
        }

        let calls = Capability::decode_batch(&response.tool_calls).map_err(|e| {
            tracing::error!(
                requested = ?response.tool_calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
                "model broke the tool contract"
            );
            e
        })?;

        messages.push(ChatMessage::assistant_with_tool_calls(
            response.content,
            response.tool_calls,
        ));

        let mut pending = calls.into_iter();
        while let Some(call) = pending.next() {
            match call.capability {
                Capability::TextualAnswer(request) => {
                    transition(&mut states, DispatchState::ExecutingTools);
                    tracing::info!(input = %request.input, "calling answer_textually");

                    let sql = self.translator.translate(&request.input).await?;
                    let rows = self.executor.execute(&sql).await?;
                    let content = serde_json::to_string(&rows).map_err(|e| {
                        AppError::Internal(format!("Failed to serialize rows: {}", e))
                    })?;

                    messages.push(ChatMessage::function_result(
                        ANSWER_TEXTUALLY,
                        call.call_id,
                        content,
                    ));
                }
                Capability::VisualAnswer(request) => {
                    transition(&mut states, DispatchState::ExecutingVisualTool);
                    tracing::info!(input = %request.input, "calling answer_visually");

                    let sql = self.translator.translate(&request.input).await?;
                    let rows = self.executor.execute(&sql).await?;
                    let artifact = self.charts.render(&request.input, &rows).await?;
                    let data_url = artifact.data_url();

                    messages.push(ChatMessage::function_result(
                        ANSWER_VISUALLY,
                        call.call_id,
                        CHART_RENDERED,
                    ));
                    // Every tool call in the turn needs a result for the history to replay
                    for skipped in pending.by_ref() {
                        tracing::debug!(
                            tool = skipped.capability.name(),
                            "skipping call after visual answer"
                        );
                        messages.push(ChatMessage::function_result(
                            skipped.capability.name(),
                            skipped.call_id,
                            NOT_EXECUTED,
                        ));
                    }
                    messages.push(ChatMessage::assistant(data_url.clone()));
                    return Ok(finish(data_url, ReplyKind::Visual, messages, states));
                }
            }
        }

        transition(&mut states, DispatchState::AwaitingFollowup);
        let followup = self
            .llm
            .chat(&messages, &GenerationOptions::default())
            .await?;

        messages.push(ChatMessage::assistant(followup.content.clone()));
        Ok(finish(followup.content, ReplyKind::Textual, messages, states))
    }
}

fn transition(states: &mut Vec<DispatchState>, next: DispatchState) {
    if states.last() != Some(&next) {
        tracing::debug!(from = ?states.last(), to = ?next, "dispatch transition");
        states.push(next);
    }
}

fn finish(
    reply: String,
    kind: ReplyKind,
    conversation: Vec<ChatMessage>,
    mut states: Vec<DispatchState>,
) -> DispatchOutcome {
    transition(&mut states, DispatchState::Done);
    DispatchOutcome {
        reply,
        kind,
        conversation,
        states,
    }
}
