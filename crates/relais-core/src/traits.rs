//! Core trait definitions for the relais orchestration pipeline.
//!
//! These traits define the trust boundary around tool execution:
//!
//! - `LanguageModel`: untrusted proposer of tool calls
//! - `ToolHandler`: the business collaborator that performs a call
//! - `CallValidator`: trusted catalogue lookup and argument validation
//! - `SafetyGuard`: trusted read-before-write check on referenced ids
//! - `ConfirmationGate`: trusted mode policy and confirmation handshake
//! - `ConsumedTokenStore`: single-use bookkeeping for confirmation tokens
//! - `AuditWriter`: trusted sink for the per-request decision journal
//!
//! The orchestrator wires them together in order. A `ToolHandler` is never
//! reached unless validation, the guard and the gate all let the call through.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use relais_contracts::{
    context::ContextId,
    error::RelaisResult,
    execution::{DecisionRecord, JournalSummary},
    known::{KnownEntity, KnownEntityIdSet},
    mode::{GateVerdict, Mode, PendingConfirmation},
    tool::{ToolCall, ToolDefinition, ToolResult, ValidatedCall},
};

use crate::model::{ModelError, ModelReply, ModelRequest, ToolFailure};

/// A language model that answers with text and proposed tool calls.
///
/// Everything it returns is untrusted input to the rest of the pipeline.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelReply, ModelError>;
}

/// The business collaborator behind one tool.
///
/// Returns the raw result object. The dispatcher enforces the
/// `{ success, message, data? }` envelope on it before anything else sees it.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: &Value) -> Result<Value, ToolFailure>;
}

/// The tool catalogue and its argument validation.
pub trait CallValidator: Send + Sync {
    /// Look up a tool by exact name.
    fn definition(&self, name: &str) -> Option<&ToolDefinition>;

    /// Every registered tool, in catalogue order.
    fn definitions(&self) -> Vec<&ToolDefinition>;

    /// Check that `call` names a registered tool and that its arguments
    /// parse and match the declared schema.
    ///
    /// Errors: `UnknownTool`, `MalformedArguments`, `InvalidArguments`.
    fn validate(&self, call: &ToolCall) -> RelaisResult<ValidatedCall>;
}

/// Read-before-write enforcement.
pub trait SafetyGuard: Send + Sync {
    /// Check every entity id the mutating call references.
    ///
    /// Returns the references that were verified, to be attested in a
    /// confirmation token. Fails with `UnverifiedReference` on the first id
    /// that is neither in `known` nor the context id.
    fn check(
        &self,
        definition: &ToolDefinition,
        call: &ValidatedCall,
        known: &KnownEntityIdSet,
        context: Option<&ContextId>,
    ) -> RelaisResult<Vec<KnownEntity>>;

    /// Extract entity ids surfaced by a successful read result.
    fn harvest(&self, definition: &ToolDefinition, result: &ToolResult) -> Vec<KnownEntity>;
}

/// Mode policy and the confirmation handshake.
pub trait ConfirmationGate: Send + Sync {
    /// Decide what happens to a validated, guard-approved call.
    fn decide(&self, mode: Mode, definition: &ToolDefinition) -> GateVerdict;

    /// Build the pending confirmation for a held call, binding a fresh
    /// token to its name, arguments and attested references.
    fn issue(
        &self,
        call: &ValidatedCall,
        attested_refs: Vec<KnownEntity>,
    ) -> RelaisResult<PendingConfirmation>;

    /// Verify a resubmitted confirmation and return the call it approves.
    ///
    /// Does not consume the token. Errors: `ConfirmationMismatch`.
    fn redeem(
        &self,
        confirmed_tool_call_id: Option<&str>,
        pending: Option<&PendingConfirmation>,
    ) -> RelaisResult<ToolCall>;

    /// Mark a token as used. Fails with `ConfirmationMismatch` if it already was.
    fn consume(&self, token: &str) -> RelaisResult<()>;
}

/// Remembers confirmation tokens that have been spent.
pub trait ConsumedTokenStore: Send + Sync {
    /// Record `token` as consumed until `expires_at`.
    ///
    /// Returns `false` if it was already recorded. Check and insert are one
    /// atomic step.
    fn mark_consumed(&self, token: &str, expires_at: DateTime<Utc>) -> bool;

    fn is_consumed(&self, token: &str) -> bool;
}

/// The per-request decision journal.
///
/// Every proposed call produces exactly one `DecisionRecord`. A failed write
/// is fatal for the request.
pub trait AuditWriter: Send + Sync {
    /// Append one record. Records are never modified or deleted.
    fn write(&self, record: &DecisionRecord) -> RelaisResult<()>;

    /// Seal the journal for `request_id` and return its summary.
    fn finalize(&self, request_id: &str) -> RelaisResult<JournalSummary>;
}
