//! Language-model exchange types.
//!
//! The orchestrator builds a [`ModelRequest`] from the caller's history and
//! grows it with assistant turns and tool outputs as calls execute. What a
//! concrete [`LanguageModel`](crate::traits::LanguageModel) does with it
//! (prompting, wire format) is its own business.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use relais_contracts::{
    context::ContextId,
    mode::Mode,
    request::{ConversationTurn, Role},
    tool::{ToolCall, ToolDefinition, ToolResult},
};

/// A tool as advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl From<&ToolDefinition> for ToolSpec {
    fn from(definition: &ToolDefinition) -> Self {
        Self {
            name: definition.name.clone(),
            description: definition.description.clone(),
            parameters: definition.arguments.clone(),
        }
    }
}

/// One entry of the model transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum ModelTurn {
    User {
        content: String,
    },
    Assistant {
        content: String,
        #[serde(default)]
        tool_calls: Vec<ToolCall>,
    },
    Tool {
        tool_call_id: String,
        name: String,
        result: ToolResult,
    },
}

impl From<&ConversationTurn> for ModelTurn {
    fn from(turn: &ConversationTurn) -> Self {
        match turn.role {
            Role::User => ModelTurn::User { content: turn.content.clone() },
            Role::Assistant => ModelTurn::Assistant {
                content: turn.content.clone(),
                tool_calls: Vec::new(),
            },
        }
    }
}

/// Everything the model sees for one completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRequest {
    pub context: Option<ContextId>,
    pub mode: Mode,
    pub turns: Vec<ModelTurn>,
    pub tools: Vec<ToolSpec>,
}

/// What the model answered: free text, tool calls, or both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelReply {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

impl ModelReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self { content: content.into(), tool_calls: Vec::new() }
    }

    pub fn calls(tool_calls: Vec<ToolCall>) -> Self {
        Self { content: String::new(), tool_calls }
    }
}

/// Failure of a language-model call, as reported by the model client.
///
/// Only `Transient` failures are eligible for the supervisor's single retry.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ModelError {
    /// Network-level or overload failure: connection reset, 429, 5xx.
    #[error("transient model failure: {0}")]
    Transient(String),

    /// The model endpoint answered with an application-level error.
    #[error("model rejected the request with status {status}: {message}")]
    Rejected { status: u16, message: String },
}

/// Failure reported by a tool collaborator.
///
/// The message is shown to the user and fed back to the model, so it must
/// describe the business outcome rather than implementation details.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{message}")]
pub struct ToolFailure {
    pub message: String,
}

impl ToolFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}
