//! The tool dispatcher: the only path from a validated call to a handler.
//!
//! Handlers are looked up by exact tool name. Whatever a handler returns is
//! checked against the `{ success, message, data? }` envelope before it is
//! forwarded, so a misbehaving collaborator surfaces as
//! `ToolContractViolation` instead of a malformed result.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use relais_contracts::{
    error::{RelaisError, RelaisResult},
    tool::{ToolResult, ValidatedCall},
};

use crate::{
    supervisor::{Deadline, Supervisor},
    traits::ToolHandler,
};

#[derive(Default, Clone)]
pub struct ToolDispatcher {
    handlers: BTreeMap<String, Arc<dyn ToolHandler>>,
}

impl ToolDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for `name`, replacing any previous one.
    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn ToolHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    pub fn with(mut self, name: impl Into<String>, handler: Arc<dyn ToolHandler>) -> Self {
        self.register(name, handler);
        self
    }

    pub fn handles(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Run a validated call and return its normalized result.
    ///
    /// A handler-reported failure becomes `ToolResult { success: false }`.
    ///
    /// Errors: `ToolTimeout`, `ToolContractViolation`, `DeadlineExceeded`,
    /// and `Internal` if no handler is registered under the call's name.
    pub async fn dispatch(
        &self,
        call: &ValidatedCall,
        supervisor: &Supervisor,
        deadline: &Deadline,
    ) -> RelaisResult<ToolResult> {
        let handler = self.handlers.get(&call.name).ok_or_else(|| RelaisError::Internal {
            reason: format!("no handler registered for tool '{}'", call.name),
        })?;

        debug!(tool = %call.name, tool_call_id = %call.id, "dispatching tool call");

        match supervisor.call_tool(&call.name, handler.as_ref(), &call.arguments, deadline).await? {
            Ok(raw) => enforce_envelope(&call.name, raw),
            Err(failure) => {
                debug!(tool = %call.name, message = %failure.message, "tool reported failure");
                Ok(ToolResult::failed(failure.message))
            }
        }
    }
}

/// Check a raw handler result against the tool-result envelope.
///
/// `success` must be a boolean and `message` a string. `data` is optional;
/// `null` counts as absent. Other keys are dropped.
pub fn enforce_envelope(tool: &str, raw: Value) -> RelaisResult<ToolResult> {
    let violation = |reason: &str| RelaisError::ToolContractViolation {
        tool: tool.to_string(),
        reason: reason.to_string(),
    };

    let mut object: Map<String, Value> = match raw {
        Value::Object(object) => object,
        _ => return Err(violation("result is not an object")),
    };

    let success = match object.remove("success") {
        Some(Value::Bool(success)) => success,
        Some(_) => return Err(violation("'success' is not a boolean")),
        None => return Err(violation("'success' is missing")),
    };

    let message = match object.remove("message") {
        Some(Value::String(message)) => message,
        Some(_) => return Err(violation("'message' is not a string")),
        None => return Err(violation("'message' is missing")),
    };

    let data = match object.remove("data") {
        None | Some(Value::Null) => None,
        Some(data) => Some(data),
    };

    if !object.is_empty() {
        let extra: Vec<&str> = object.keys().map(String::as_str).collect();
        warn!(tool, extra = ?extra, "dropping unexpected keys from tool result");
    }

    Ok(ToolResult { success, message, data })
}
