//! Error taxonomy for the relais orchestration pipeline.
//!
//! All fallible operations in the pipeline return `RelaisResult<T>`. Every
//! variant maps to a stable, machine-checkable [`ReasonCode`], an HTTP status
//! class, and a `details` object carrying the offending tool, field or id so
//! the caller (or the model on its next turn) can self-correct.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

/// Stable reason codes surfaced to callers.
///
/// The serialized form (`PascalCase`) is part of the external contract and
/// must never change for an existing variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReasonCode {
    InvalidRequest,
    InvalidContext,
    UnknownTool,
    MalformedArguments,
    InvalidArguments,
    UnverifiedReference,
    ConfirmationMismatch,
    UpstreamTimeout,
    UpstreamUnavailable,
    ToolTimeout,
    ToolContractViolation,
    DeadlineExceeded,
    Internal,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::InvalidRequest => "InvalidRequest",
            ReasonCode::InvalidContext => "InvalidContext",
            ReasonCode::UnknownTool => "UnknownTool",
            ReasonCode::MalformedArguments => "MalformedArguments",
            ReasonCode::InvalidArguments => "InvalidArguments",
            ReasonCode::UnverifiedReference => "UnverifiedReference",
            ReasonCode::ConfirmationMismatch => "ConfirmationMismatch",
            ReasonCode::UpstreamTimeout => "UpstreamTimeout",
            ReasonCode::UpstreamUnavailable => "UpstreamUnavailable",
            ReasonCode::ToolTimeout => "ToolTimeout",
            ReasonCode::ToolContractViolation => "ToolContractViolation",
            ReasonCode::DeadlineExceeded => "DeadlineExceeded",
            ReasonCode::Internal => "Internal",
        }
    }

    /// The HTTP status a response carrying this code is sent with.
    pub fn http_status(&self) -> u16 {
        match self {
            ReasonCode::InvalidRequest
            | ReasonCode::InvalidContext
            | ReasonCode::ConfirmationMismatch => 400,
            ReasonCode::UnknownTool
            | ReasonCode::MalformedArguments
            | ReasonCode::InvalidArguments
            | ReasonCode::UnverifiedReference => 422,
            ReasonCode::DeadlineExceeded => 408,
            ReasonCode::UpstreamUnavailable | ReasonCode::ToolContractViolation => 502,
            ReasonCode::UpstreamTimeout | ReasonCode::ToolTimeout => 504,
            ReasonCode::Internal => 500,
        }
    }

    /// True for errors the caller can correct (classes 1–5). These are never
    /// retried automatically.
    pub fn is_caller_correctable(&self) -> bool {
        self.http_status() < 500 && *self != ReasonCode::DeadlineExceeded
    }
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unified error type for the relais runtime.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RelaisError {
    /// The request body is malformed or violates a size/shape limit.
    #[error("invalid request: {reason}")]
    InvalidRequest {
        reason: String,
        field: Option<String>,
    },

    /// The scope identifier does not name a valid entity context.
    #[error("invalid context: {reason}")]
    InvalidContext { reason: String },

    /// The model proposed a tool name that is not in the catalogue.
    #[error("unknown tool '{tool}'")]
    UnknownTool { tool: String },

    /// The transport-level arguments payload could not be parsed.
    #[error("malformed arguments for tool '{tool}': {reason}")]
    MalformedArguments { tool: String, reason: String },

    /// The parsed arguments do not satisfy the tool's argument schema.
    #[error("invalid arguments for tool '{tool}' at '{field}': {reason}")]
    InvalidArguments {
        tool: String,
        field: String,
        reason: String,
    },

    /// A mutating call references an identifier never surfaced in this request.
    #[error("tool '{tool}' references {kind} id '{id}' (field '{field}') that was not observed in this conversation")]
    UnverifiedReference {
        tool: String,
        field: String,
        kind: String,
        id: String,
    },

    /// A confirmation resubmission does not match an outstanding pending call.
    #[error("confirmation mismatch: {reason}")]
    ConfirmationMismatch { reason: String },

    /// The language model did not answer within its timeout.
    #[error("language model did not answer within {timeout_ms} ms")]
    UpstreamTimeout { timeout_ms: u64 },

    /// The language model failed after the allowed retry, or rejected the call.
    #[error("language model unavailable: {reason}")]
    UpstreamUnavailable { reason: String },

    /// A tool execution did not complete within its timeout.
    #[error("tool '{tool}' did not complete within {timeout_ms} ms")]
    ToolTimeout { tool: String, timeout_ms: u64 },

    /// A tool implementation returned something other than a ToolResult.
    #[error("tool '{tool}' violated the result contract: {reason}")]
    ToolContractViolation { tool: String, reason: String },

    /// The overall request budget ran out.
    #[error("request deadline of {deadline_ms} ms exceeded")]
    DeadlineExceeded { deadline_ms: u64 },

    /// A required configuration value is missing or invalid.
    #[error("configuration error: {reason}")]
    ConfigError { reason: String },

    /// An invariant of the runtime itself was broken.
    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl RelaisError {
    /// The stable reason code for this error.
    pub fn code(&self) -> ReasonCode {
        match self {
            RelaisError::InvalidRequest { .. } => ReasonCode::InvalidRequest,
            RelaisError::InvalidContext { .. } => ReasonCode::InvalidContext,
            RelaisError::UnknownTool { .. } => ReasonCode::UnknownTool,
            RelaisError::MalformedArguments { .. } => ReasonCode::MalformedArguments,
            RelaisError::InvalidArguments { .. } => ReasonCode::InvalidArguments,
            RelaisError::UnverifiedReference { .. } => ReasonCode::UnverifiedReference,
            RelaisError::ConfirmationMismatch { .. } => ReasonCode::ConfirmationMismatch,
            RelaisError::UpstreamTimeout { .. } => ReasonCode::UpstreamTimeout,
            RelaisError::UpstreamUnavailable { .. } => ReasonCode::UpstreamUnavailable,
            RelaisError::ToolTimeout { .. } => ReasonCode::ToolTimeout,
            RelaisError::ToolContractViolation { .. } => ReasonCode::ToolContractViolation,
            RelaisError::DeadlineExceeded { .. } => ReasonCode::DeadlineExceeded,
            RelaisError::ConfigError { .. } | RelaisError::Internal { .. } => ReasonCode::Internal,
        }
    }

    /// Structured diagnostics for the error body.
    ///
    /// Only caller-meaningful fields are exposed; configuration and internal
    /// faults produce an empty object.
    pub fn details(&self) -> Value {
        match self {
            RelaisError::InvalidRequest { field, .. } => match field {
                Some(field) => json!({ "field": field }),
                None => Value::Object(Map::new()),
            },
            RelaisError::UnknownTool { tool } | RelaisError::MalformedArguments { tool, .. } => {
                json!({ "tool": tool })
            }
            RelaisError::InvalidArguments { tool, field, .. } => {
                json!({ "tool": tool, "field": field })
            }
            RelaisError::UnverifiedReference { tool, field, kind, id } => {
                json!({ "tool": tool, "field": field, "kind": kind, "id": id })
            }
            RelaisError::ToolTimeout { tool, timeout_ms } => {
                json!({ "tool": tool, "timeoutMs": timeout_ms })
            }
            RelaisError::ToolContractViolation { tool, .. } => json!({ "tool": tool }),
            RelaisError::UpstreamTimeout { timeout_ms } => json!({ "timeoutMs": timeout_ms }),
            RelaisError::DeadlineExceeded { deadline_ms } => json!({ "deadlineMs": deadline_ms }),
            _ => Value::Object(Map::new()),
        }
    }

    /// The message shown to callers. Internal faults are masked.
    pub fn public_message(&self) -> String {
        match self {
            RelaisError::ConfigError { .. } | RelaisError::Internal { .. } => {
                "internal error".to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Convenience alias used throughout the relais crates.
pub type RelaisResult<T> = Result<T, RelaisError>;
