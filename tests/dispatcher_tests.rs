//! Dispatch cycles of the Chinook assistant against scripted services.

mod common;

use common::mocks::{textual_call, visual_call, FakeRunner, RecordingExecutor, ScriptedLLMClient};
use ragdesk::agents::{
    DispatchState, ReplyKind, ASSISTANT_INSTRUCTIONS, CHART_RENDERED, NOT_EXECUTED,
};
use ragdesk::db::QueryExecutor;
use ragdesk::llm::LLMClient;
use ragdesk::tools::CodeRunner;
use ragdesk::types::{AppError, ChatMessage, MessageRole, ToolCall};
use ragdesk::ToolDispatcher;
use serde_json::json;
use std::sync::Arc;

const PNG: &[u8] = b"\x89PNG\r\n\x1a\n";

struct Harness {
    dispatcher: ToolDispatcher,
    llm: Arc<ScriptedLLMClient>,
    executor: Arc<RecordingExecutor>,
    runner: Arc<FakeRunner>,
}

fn harness(llm: ScriptedLLMClient, executor: RecordingExecutor) -> Harness {
    let llm = Arc::new(llm);
    let executor = Arc::new(executor);
    let runner = Arc::new(FakeRunner::new(PNG));
    let dispatcher = ToolDispatcher::new(
        Arc::clone(&llm) as Arc<dyn LLMClient>,
        Arc::clone(&executor) as Arc<dyn QueryExecutor>,
        Arc::clone(&runner) as Arc<dyn CodeRunner>,
    );
    Harness {
        dispatcher,
        llm,
        executor,
        runner,
    }
}

fn employee_count() -> Vec<Vec<serde_json::Value>> {
    vec![vec![json!(8)]]
}

#[tokio::test]
async fn test_direct_answer_makes_one_call() {
    let h = harness(
        ScriptedLLMClient::new().reply("I don't know."),
        RecordingExecutor::returning(vec![]),
    );

    let outcome = h
        .dispatcher
        .chat("What's the weather in Paris?", None)
        .await
        .unwrap();

    assert_eq!(outcome.reply, "I don't know.");
    assert_eq!(outcome.kind, ReplyKind::Direct);
    assert_eq!(
        outcome.states,
        vec![DispatchState::AwaitingDecision, DispatchState::Done]
    );

    let calls = h.llm.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].tools, vec!["answer_textually", "answer_visually"]);
    assert!(h.executor.statements().is_empty());
}

#[tokio::test]
async fn test_fresh_conversation_starts_with_instructions() {
    let h = harness(
        ScriptedLLMClient::new().reply("Hello."),
        RecordingExecutor::returning(vec![]),
    );

    let outcome = h.dispatcher.chat("Hi", None).await.unwrap();

    let first = &h.llm.calls()[0].messages;
    assert_eq!(first.len(), 2);
    assert_eq!(first[0], ChatMessage::system(ASSISTANT_INSTRUCTIONS));
    assert_eq!(first[1], ChatMessage::user("Hi"));
    assert_eq!(outcome.conversation.last(), Some(&ChatMessage::assistant("Hello.")));
}

#[tokio::test]
async fn test_textual_answer_runs_followup() {
    let h = harness(
        ScriptedLLMClient::new()
            .tool_calls(vec![textual_call("call_1", "How many employees are there?")])
            .reply("```sql\nSELECT COUNT(*) FROM employees\n```")
            .reply("Chinook has 8 employees."),
        RecordingExecutor::returning(employee_count()),
    );

    let outcome = h
        .dispatcher
        .chat("How many employees does Chinook have?", None)
        .await
        .unwrap();

    assert_eq!(outcome.reply, "Chinook has 8 employees.");
    assert_eq!(outcome.kind, ReplyKind::Textual);
    assert_eq!(
        outcome.states,
        vec![
            DispatchState::AwaitingDecision,
            DispatchState::ExecutingTools,
            DispatchState::AwaitingFollowup,
            DispatchState::Done,
        ]
    );

    // Fences are stripped before the statement reaches the database
    assert_eq!(h.executor.statements(), vec!["SELECT COUNT(*) FROM employees"]);

    let calls = h.llm.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[1].temperature, Some(0.0));
    assert!(calls[1].tools.is_empty());

    let followup = &calls[2];
    assert!(followup.tools.is_empty());
    let result = followup.messages.last().unwrap();
    assert_eq!(result.role, MessageRole::Function);
    assert_eq!(result.name.as_deref(), Some("answer_textually"));
    assert_eq!(result.tool_call_id.as_deref(), Some("call_1"));
    assert_eq!(result.content, "[[8]]");

    let request = &followup.messages[followup.messages.len() - 2];
    assert_eq!(request.role, MessageRole::Assistant);
    assert_eq!(request.tool_calls.len(), 1);
}

#[tokio::test]
async fn test_textual_calls_run_in_order_with_one_followup() {
    let h = harness(
        ScriptedLLMClient::new()
            .tool_calls(vec![
                textual_call("a", "How many employees?"),
                textual_call("b", "How many customers?"),
            ])
            .reply("SELECT COUNT(*) FROM employees")
            .reply("SELECT COUNT(*) FROM customers")
            .reply("8 employees and 59 customers."),
        RecordingExecutor::returning(employee_count()),
    );

    let outcome = h.dispatcher.chat("Head counts?", None).await.unwrap();

    assert_eq!(outcome.reply, "8 employees and 59 customers.");
    assert_eq!(
        h.executor.statements(),
        vec![
            "SELECT COUNT(*) FROM employees",
            "SELECT COUNT(*) FROM customers"
        ]
    );

    let calls = h.llm.calls();
    assert_eq!(calls.len(), 4);
    let ids: Vec<_> = calls[3]
        .messages
        .iter()
        .filter(|m| m.role == MessageRole::Function)
        .filter_map(|m| m.tool_call_id.clone())
        .collect();
    assert_eq!(ids, vec!["a", "b"]);
}

#[tokio::test]
async fn test_visual_answer_returns_data_url_without_followup() {
    let h = harness(
        ScriptedLLMClient::new()
            .tool_calls(vec![visual_call("v1", "Plot sales of the 10 most popular albums")])
            .reply("SELECT Title, SUM(Quantity) FROM albums GROUP BY Title LIMIT 10")
            .reply("```python\nimport matplotlib\nmatplotlib.use('Agg')\n```"),
        RecordingExecutor::returning(vec![vec![json!("Greatest Hits"), json!(26)]]),
    );

    let outcome = h
        .dispatcher
        .chat("Plot sales of Chinook's 10 most popular albums", None)
        .await
        .unwrap();

    assert_eq!(outcome.kind, ReplyKind::Visual);
    assert!(outcome.reply.starts_with("data:image/png;base64,"));
    assert_eq!(
        outcome.states,
        vec![
            DispatchState::AwaitingDecision,
            DispatchState::ExecutingVisualTool,
            DispatchState::Done,
        ]
    );

    assert_eq!(h.llm.calls().len(), 3);
    assert_eq!(h.llm.remaining(), 0);
    assert_eq!(
        h.runner.scripts(),
        vec!["import matplotlib\nmatplotlib.use('Agg')"]
    );

    // The tool-call turn stays in the history, answered by the chart result
    let roles: Vec<_> = outcome.conversation.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![
            MessageRole::System,
            MessageRole::User,
            MessageRole::Assistant,
            MessageRole::Function,
            MessageRole::Assistant,
        ]
    );
    assert_eq!(outcome.conversation[3].tool_call_id.as_deref(), Some("v1"));
    assert_eq!(outcome.conversation[3].content, CHART_RENDERED);
    assert_eq!(
        outcome.conversation.last(),
        Some(&ChatMessage::assistant(outcome.reply.clone()))
    );
}

#[tokio::test]
async fn test_visual_call_skips_later_calls_in_batch() {
    let h = harness(
        ScriptedLLMClient::new()
            .tool_calls(vec![
                visual_call("v1", "Chart invoices by country"),
                textual_call("t1", "How many invoices?"),
            ])
            .reply("SELECT BillingCountry, COUNT(*) FROM invoices GROUP BY BillingCountry")
            .reply("print('chart')"),
        RecordingExecutor::returning(vec![vec![json!("USA"), json!(91)]]),
    );

    let outcome = h.dispatcher.chat("Invoices?", None).await.unwrap();

    assert_eq!(outcome.kind, ReplyKind::Visual);
    assert_eq!(h.executor.statements().len(), 1);
    assert_eq!(h.runner.scripts().len(), 1);
    assert_eq!(h.llm.calls().len(), 3);

    // Every requested call is answered, the skipped one as not executed
    let results: Vec<_> = outcome
        .conversation
        .iter()
        .filter(|m| m.role == MessageRole::Function)
        .map(|m| (m.tool_call_id.clone().unwrap(), m.content.clone()))
        .collect();
    assert_eq!(
        results,
        vec![
            ("v1".to_string(), CHART_RENDERED.to_string()),
            ("t1".to_string(), NOT_EXECUTED.to_string()),
        ]
    );
}

#[tokio::test]
async fn test_textual_call_before_visual_call_is_kept() {
    let h = harness(
        ScriptedLLMClient::new()
            .tool_calls(vec![
                textual_call("t1", "How many invoices?"),
                visual_call("v1", "Chart invoices by country"),
            ])
            .reply("SELECT COUNT(*) FROM invoices")
            .reply("SELECT BillingCountry, COUNT(*) FROM invoices GROUP BY BillingCountry")
            .reply("print('chart')"),
        RecordingExecutor::returning(vec![vec![json!("USA"), json!(91)]]),
    );

    let outcome = h.dispatcher.chat("Invoices?", None).await.unwrap();

    assert_eq!(outcome.kind, ReplyKind::Visual);
    assert_eq!(
        h.executor.statements(),
        vec![
            "SELECT COUNT(*) FROM invoices",
            "SELECT BillingCountry, COUNT(*) FROM invoices GROUP BY BillingCountry"
        ]
    );
    assert_eq!(h.llm.calls().len(), 4);
    assert_eq!(h.llm.remaining(), 0);

    let roles: Vec<_> = outcome.conversation.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![
            MessageRole::System,
            MessageRole::User,
            MessageRole::Assistant,
            MessageRole::Function,
            MessageRole::Function,
            MessageRole::Assistant,
        ]
    );
    assert_eq!(outcome.conversation[2].tool_calls.len(), 2);
    assert_eq!(outcome.conversation[3].tool_call_id.as_deref(), Some("t1"));
    assert_eq!(outcome.conversation[3].content, r#"[["USA",91]]"#);
    assert_eq!(outcome.conversation[4].tool_call_id.as_deref(), Some("v1"));
    assert_eq!(outcome.conversation[4].content, CHART_RENDERED);
}

#[tokio::test]
async fn test_unknown_tool_aborts_before_any_tool_runs() {
    let h = harness(
        ScriptedLLMClient::new().tool_calls(vec![
            textual_call("t1", "How many tracks?"),
            ToolCall {
                id: "x".to_string(),
                name: "drop_tables".to_string(),
                arguments: json!({ "input": "everything" }),
            },
        ]),
        RecordingExecutor::returning(employee_count()),
    );

    let err = h.dispatcher.chat("Do it", None).await.unwrap_err();

    assert!(matches!(err, AppError::ToolContract(_)));
    assert!(err.is_fatal());
    assert!(h.executor.statements().is_empty());
    assert!(h.runner.scripts().is_empty());
    assert_eq!(h.llm.calls().len(), 1);
}

#[tokio::test]
async fn test_legacy_tool_names_are_accepted() {
    let h = harness(
        ScriptedLLMClient::new()
            .tool_calls(vec![ToolCall {
                id: "old".to_string(),
                name: "answer_question_textually".to_string(),
                arguments: json!({ "input": "How many genres?" }),
            }])
            .reply("SELECT COUNT(*) FROM genres")
            .reply("There are 25 genres."),
        RecordingExecutor::returning(vec![vec![json!(25)]]),
    );

    let outcome = h.dispatcher.chat("Genres?", None).await.unwrap();
    assert_eq!(outcome.reply, "There are 25 genres.");
}

#[tokio::test]
async fn test_database_error_skips_followup() {
    let h = harness(
        ScriptedLLMClient::new()
            .tool_calls(vec![textual_call("t1", "How many employees?")])
            .reply("SELECT COUNT(*) FROM employee")
            .reply("never used"),
        RecordingExecutor::failing(),
    );

    let err = h.dispatcher.chat("Employees?", None).await.unwrap_err();

    assert!(matches!(err, AppError::Database(_)));
    assert!(!err.is_fatal());
    assert_eq!(h.llm.calls().len(), 2);
    assert_eq!(h.llm.remaining(), 1);
}

#[tokio::test]
async fn test_history_is_threaded_through() {
    let h = harness(
        ScriptedLLMClient::new()
            .reply("Chinook has 8 employees.")
            .reply("Andrew Adams is the general manager."),
        RecordingExecutor::returning(vec![]),
    );

    let first = h
        .dispatcher
        .chat("How many employees are there?", None)
        .await
        .unwrap();
    let second = h
        .dispatcher
        .chat("Who manages them?", Some(first.conversation.clone()))
        .await
        .unwrap();

    let calls = h.llm.calls();
    assert_eq!(calls[1].messages.len(), first.conversation.len() + 1);
    assert_eq!(calls[1].messages[..first.conversation.len()], first.conversation[..]);
    assert_eq!(second.conversation.len(), first.conversation.len() + 2);
    assert_eq!(second.reply, "Andrew Adams is the general manager.");
}

#[tokio::test]
async fn test_empty_history_uses_instructions() {
    let h = harness(
        ScriptedLLMClient::new().reply("ok"),
        RecordingExecutor::returning(vec![]),
    );

    h.dispatcher.chat("Hi", Some(Vec::new())).await.unwrap();

    assert_eq!(
        h.llm.calls()[0].messages[0],
        ChatMessage::system(ASSISTANT_INSTRUCTIONS)
    );
}
