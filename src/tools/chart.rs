//! Chart rendering: the model writes a plotting script, the sandbox runs it.

use crate::db::chinook::QueryRows;
use crate::llm::{GenerationOptions, LLMClient};
use crate::tools::sandbox::{Artifact, CodeRunner, ARTIFACT_FILE_NAME};
use crate::tools::text2sql::strip_code_fences;
use crate::types::{AppError, Result};
use std::sync::Arc;

const CODE_SYSTEM_PROMPT: &str = "You are a data expert who can respond to questions by \
    generating code that creates colorful charts and graphs.";

pub struct ChartGenerator {
    llm: Arc<dyn LLMClient>,
    runner: Arc<dyn CodeRunner>,
}

impl ChartGenerator {
    pub fn new(llm: Arc<dyn LLMClient>, runner: Arc<dyn CodeRunner>) -> Self {
        Self { llm, runner }
    }

    fn prompt(text: &str, data: &str, path: &str) -> String {
        format!(
            "Generate Python code that uses Matplotlib and optionally Seaborn to generate a \
             chart or graph in response to the prompt below using the data below. Return the \
             code only. Do not use markdown formatting, and do not explain the code. Do not \
             generate code that could be harmful to the computer it's running on, and do not \
             include a call to plt.show(). Include code to save the image that is generated as \
             a PNG file using the path \"{path}\". Include a call to plt.close() at the end, and \
             a call to matplotlib.use('Agg') at the beginning. Also include code to suppress \
             any warnings.\n\n\
             PROMPT: {text}\n\n\
             DATA: {data}"
        )
    }

    /// Ask the model for a script that plots `data` and saves it to `path`.
    pub async fn generate_code(&self, text: &str, data: &str, path: &str) -> Result<String> {
        let raw = self
            .llm
            .generate_with_system(
                CODE_SYSTEM_PROMPT,
                &Self::prompt(text, data, path),
                &GenerationOptions::deterministic(),
            )
            .await?;
        Ok(strip_code_fences(&raw))
    }

    /// Generate and run a plotting script for `rows`.
    pub async fn render(&self, text: &str, rows: &QueryRows) -> Result<Artifact> {
        let data = serde_json::to_string(rows)
            .map_err(|e| AppError::Internal(format!("Failed to serialize rows: {}", e)))?;

        let code = self.generate_code(text, &data, ARTIFACT_FILE_NAME).await?;
        tracing::debug!(lines = code.lines().count(), "generated chart script");

        self.runner.run(&code).await
    }
}
