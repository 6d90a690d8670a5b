//! Tool catalogue and tool-call types.
//!
//! A [`ToolDefinition`] is registered once at startup and never changes. The
//! model proposes [`ToolCall`]s; the validator promotes them to
//! [`ValidatedCall`]s, which are the only thing the dispatcher accepts.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::EntityKind;

/// An argument field that carries an entity identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    /// Dotted path into the arguments object, e.g. `"id"` or `"lines.deal_id"`.
    pub field: String,
    /// The kind of entity the identifier names.
    pub kind: EntityKind,
}

/// A single catalogue entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool name, e.g. `"update_client"`.
    pub name: String,

    /// Short description forwarded to the model.
    #[serde(default)]
    pub description: String,

    /// True when executing the tool changes business data.
    #[serde(default)]
    pub mutates: bool,

    /// True when the change is hard to undo (delete, send). Destructive calls
    /// always require confirmation, even in auto mode.
    #[serde(default)]
    pub destructive: bool,

    /// True when a successful result surfaces entity identifiers to the model.
    #[serde(default)]
    pub reads_entity_ids: bool,

    /// Kind of the records a read tool returns; each `id` key in its result
    /// data is recorded as an identifier of this kind.
    #[serde(default)]
    pub result_kind: Option<EntityKind>,

    /// Argument fields holding entity identifiers checked by the safety guard.
    #[serde(default)]
    pub entity_refs: Vec<EntityRef>,

    /// JSON Schema for the arguments object.
    #[serde(default = "empty_object_schema")]
    pub arguments: Value,
}

fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object" })
}

/// A tool invocation as proposed by the language model.
///
/// `arguments` is untrusted: it may be an object or the raw JSON text the
/// function-calling channel produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// A call that passed registry lookup and schema validation.
///
/// `arguments` is always a JSON object here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// The canonical envelope every tool execution produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ToolResult {
    pub fn ok(message: impl Into<String>, data: Option<Value>) -> Self {
        Self { success: true, message: message.into(), data }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self { success: false, message: message.into(), data: None }
    }
}
