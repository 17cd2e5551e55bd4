//! Model-driven orchestration.
//!
//! - [`dispatcher`] - The Chinook assistant's tool-dispatch cycle

pub mod dispatcher;

pub use dispatcher::{
    DispatchOutcome, DispatchState, ReplyKind, ToolDispatcher, ASSISTANT_INSTRUCTIONS,
    CHART_RENDERED, NOT_EXECUTED,
};
