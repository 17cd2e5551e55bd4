//! The closed set of capabilities the assistant model may invoke.
//!
//! Tool calls arrive from the model as `(name, arguments)` pairs. They are
//! decoded here, once, into [`Capability`] values; past this boundary the
//! dispatcher matches exhaustively and never sees a tool name again.

use crate::types::{AppError, Result, ToolCall, ToolDefinition};
use serde::Deserialize;
use serde_json::json;

pub const ANSWER_TEXTUALLY: &str = "answer_textually";
pub const ANSWER_VISUALLY: &str = "answer_visually";

/// Older wire names, still accepted on decode
const LEGACY_TEXTUAL: &str = "answer_question_textually";
const LEGACY_VISUAL: &str = "answer_question_visually";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TextualRequest {
    /// The user's question, as restated by the model
    pub input: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VisualRequest {
    pub input: String,
}

/// A decoded tool call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capability {
    /// Query the database and fold rows back into the conversation
    TextualAnswer(TextualRequest),
    /// Query the database and render a chart; terminal
    VisualAnswer(VisualRequest),
}

/// A capability together with the call it was decoded from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedCall {
    pub call_id: String,
    pub capability: Capability,
}

impl Capability {
    /// Decode a single tool call.
    pub fn decode(call: &ToolCall) -> Result<Self> {
        match call.name.as_str() {
            ANSWER_TEXTUALLY | LEGACY_TEXTUAL => {
                Ok(Capability::TextualAnswer(parse_arguments(call)?))
            }
            ANSWER_VISUALLY | LEGACY_VISUAL => Ok(Capability::VisualAnswer(parse_arguments(call)?)),
            other => Err(AppError::ToolContract(format!(
                "Model requested unknown tool '{}'",
                other
            ))),
        }
    }

    /// Decode a whole batch in order. Fails on the first invalid call, before
    /// any capability has run.
    pub fn decode_batch(calls: &[ToolCall]) -> Result<Vec<DecodedCall>> {
        calls
            .iter()
            .map(|call| {
                Ok(DecodedCall {
                    call_id: call.id.clone(),
                    capability: Self::decode(call)?,
                })
            })
            .collect()
    }

    /// Canonical wire name
    pub fn name(&self) -> &'static str {
        match self {
            Capability::TextualAnswer(_) => ANSWER_TEXTUALLY,
            Capability::VisualAnswer(_) => ANSWER_VISUALLY,
        }
    }

    pub fn input(&self) -> &str {
        match self {
            Capability::TextualAnswer(req) => &req.input,
            Capability::VisualAnswer(req) => &req.input,
        }
    }
}

fn parse_arguments<T: serde::de::DeserializeOwned>(call: &ToolCall) -> Result<T> {
    serde_json::from_value(call.arguments.clone()).map_err(|e| {
        AppError::ToolContract(format!(
            "Invalid arguments for tool '{}': {}",
            call.name, e
        ))
    })
}

fn input_parameters() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "input": {
                "type": "string",
                "description": "Input from the user"
            }
        },
        "required": ["input"]
    })
}

/// Tool descriptors advertised to the assistant model.
pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: ANSWER_TEXTUALLY.to_string(),
            description: "Queries the Chinook database to answer a question and provide a \
                textual response. Only call this function if the question doesn't lend itself \
                to a graphical response. Examples include \"How many employees does Chinook \
                have\" and \"How much revenue did Chinook generate in 2011.\""
                .to_string(),
            parameters: input_parameters(),
        },
        ToolDefinition {
            name: ANSWER_VISUALLY.to_string(),
            description: "Queries the Chinook database to answer a question and provide a \
                visual response in the form of a chart or graph. Only call this function if \
                the question lends itself to a graphical response. Examples include \"Plot \
                sales of Chinook's 10 most popular albums\" and \"Show me how many albums were \
                sold in 2010, 2011, and 2012.\""
                .to_string(),
            parameters: input_parameters(),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn call(name: &str, arguments: serde_json::Value) -> ToolCall {
        ToolCall {
            id: format!("call_{}", name),
            name: name.to_string(),
            arguments,
        }
    }

    #[rstest]
    #[case("answer_textually", true)]
    #[case("answer_question_textually", true)]
    #[case("answer_visually", false)]
    #[case("answer_question_visually", false)]
    fn test_decode_known_names(#[case] name: &str, #[case] textual: bool) {
        let capability = Capability::decode(&call(name, json!({"input": "How many employees?"})))
            .unwrap();
        assert_eq!(capability.input(), "How many employees?");
        assert_eq!(matches!(capability, Capability::TextualAnswer(_)), textual);
    }

    #[test]
    fn test_unknown_name_is_contract_violation() {
        let err = Capability::decode(&call("delete_everything", json!({"input": "x"}))).unwrap_err();
        assert!(matches!(err, AppError::ToolContract(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_missing_input_is_contract_violation() {
        let err = Capability::decode(&call(ANSWER_TEXTUALLY, json!({}))).unwrap_err();
        assert!(matches!(err, AppError::ToolContract(_)));
    }

    #[test]
    fn test_unparsed_arguments_rejected() {
        let err = Capability::decode(&call(ANSWER_VISUALLY, json!("{not json"))).unwrap_err();
        assert!(matches!(err, AppError::ToolContract(_)));
    }

    #[test]
    fn test_batch_fails_before_returning_anything() {
        let batch = vec![
            call(ANSWER_TEXTUALLY, json!({"input": "a"})),
            call("delete_everything", json!({"input": "b"})),
        ];
        assert!(Capability::decode_batch(&batch).is_err());
    }

    #[test]
    fn test_batch_preserves_order_and_ids() {
        let batch = vec![
            call(ANSWER_VISUALLY, json!({"input": "plot"})),
            call(ANSWER_TEXTUALLY, json!({"input": "count"})),
        ];
        let decoded = Capability::decode_batch(&batch).unwrap();
        assert_eq!(decoded[0].call_id, "call_answer_visually");
        assert_eq!(decoded[0].capability.name(), ANSWER_VISUALLY);
        assert_eq!(decoded[1].capability.name(), ANSWER_TEXTUALLY);
    }

    #[test]
    fn test_tool_definitions() {
        let defs = tool_definitions();
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0].name, ANSWER_TEXTUALLY);
        assert_eq!(defs[1].name, ANSWER_VISUALLY);
        for def in &defs {
            assert_eq!(def.parameters["required"], json!(["input"]));
        }
    }
}
