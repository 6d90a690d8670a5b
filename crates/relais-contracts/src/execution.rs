//! Request outcomes and decision journal records.
//!
//! `ChatResponse` is what the orchestrator hands back to the caller: exactly
//! one shape per request. `DecisionRecord` is what gets written to the
//! journal: one per proposed tool call, whatever happened to it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    context::ContextId,
    error::{ReasonCode, RelaisError},
    mode::{Mode, PendingConfirmation},
    tool::ToolResult,
};

/// A tool call that ran, with its normalized result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutedCall {
    pub tool_call_id: String,
    pub name: String,
    pub arguments: Value,
    pub result: ToolResult,
}

/// A validated call described in plan mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedCall {
    pub tool_call_id: String,
    pub name: String,
    pub arguments: Value,
    pub mutates: bool,
}

/// The single response shape returned for a request.
///
/// Callers match on `type`:
/// - `message` → the model answered without tools
/// - `tool_results` → one or more calls ran; `content` is the follow-up text
/// - `pending_confirmation` → resubmit with `confirmedAction` to proceed
/// - `plan` → plan mode description, nothing ran
/// - `error` → a stable `code`, a message, and diagnostic `details`
///
/// `pending_confirmation` and `error` also list, under `results`, the calls
/// that earlier model turns of the same request already executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatResponse {
    Message {
        content: String,
    },
    ToolResults {
        results: Vec<ExecutedCall>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
    PendingConfirmation {
        pending: PendingConfirmation,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        results: Vec<ExecutedCall>,
    },
    Plan {
        planned: Vec<PlannedCall>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
    Error {
        code: ReasonCode,
        message: String,
        details: Value,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        results: Vec<ExecutedCall>,
    },
}

impl ChatResponse {
    pub fn from_error(error: &RelaisError) -> Self {
        Self::from_error_after(error, Vec::new())
    }

    /// The error shape for a request that had already executed `results`.
    pub fn from_error_after(error: &RelaisError, results: Vec<ExecutedCall>) -> Self {
        ChatResponse::Error {
            code: error.code(),
            message: error.public_message(),
            details: error.details(),
            results,
        }
    }

    /// The snake_case name of this shape, used as the SSE event name.
    pub fn kind(&self) -> &'static str {
        match self {
            ChatResponse::Message { .. } => "message",
            ChatResponse::ToolResults { .. } => "tool_results",
            ChatResponse::PendingConfirmation { .. } => "pending_confirmation",
            ChatResponse::Plan { .. } => "plan",
            ChatResponse::Error { .. } => "error",
        }
    }

    /// HTTP status for this shape.
    pub fn http_status(&self) -> u16 {
        match self {
            ChatResponse::Error { code, .. } => code.http_status(),
            _ => 200,
        }
    }
}

/// Compact commitment to the request's decision journal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalSummary {
    pub entries: u64,
    pub terminal_hash: String,
}

/// The full body sent back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    pub request_id: String,
    pub mode: Mode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_id: Option<ContextId>,
    pub journal: JournalSummary,
    pub response: ChatResponse,
}

/// What happened to a proposed tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Executed,
    Held,
    Planned,
    Rejected,
    /// Another call of the same model reply was refused, held or failed
    /// before this one could run.
    Skipped,
}

/// An immutable record of one tool-call decision, written to the journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRecord {
    pub tool_call_id: String,
    pub tool: String,
    pub decision: Decision,
    /// Present when `decision` is `Rejected`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ReasonCode>,
    /// Present when `decision` is `Executed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    pub timestamp: DateTime<Utc>,
}
