//! Natural language to SQLite via a deterministic model call.
//!
//! The output is not validated; the database rejecting it is the only check.

use crate::db::chinook::CHINOOK_SCHEMA;
use crate::llm::{GenerationOptions, LLMClient};
use crate::types::Result;
use std::sync::Arc;

const SQL_SYSTEM_PROMPT: &str =
    "You are a database expert who can convert questions into SQL queries";

pub struct SqlTranslator {
    llm: Arc<dyn LLMClient>,
    schema: &'static str,
}

impl SqlTranslator {
    /// Translator targeting the Chinook schema
    pub fn new(llm: Arc<dyn LLMClient>) -> Self {
        Self {
            llm,
            schema: CHINOOK_SCHEMA,
        }
    }

    fn prompt(&self, text: &str) -> String {
        format!(
            "Generate a well-formed SQLite query from the prompt below. Return the SQL only. \
             Do not use markdown formatting, and do not use SELECT *.\n\n\
             PROMPT: {text}\n\n\
             The database targeted by the query contains the following tables:\n\n{}",
            self.schema
        )
    }

    /// Translate `text` into one query string.
    pub async fn translate(&self, text: &str) -> Result<String> {
        let raw = self
            .llm
            .generate_with_system(
                SQL_SYSTEM_PROMPT,
                &self.prompt(text),
                &GenerationOptions::deterministic(),
            )
            .await?;

        let sql = strip_code_fences(&raw);
        tracing::debug!(sql = %sql, "translated question to SQL");
        Ok(sql)
    }
}

/// Remove markdown fence lines (an opening ```` ```lang ```` and the closing
/// ```` ``` ````), then trim.
pub fn strip_code_fences(text: &str) -> String {
    text.lines()
        .filter(|line| !is_fence(line))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

fn is_fence(line: &str) -> bool {
    line.trim_end()
        .strip_prefix("```")
        .is_some_and(|lang| lang.chars().all(|c| c.is_alphanumeric() || c == '_'))
}
