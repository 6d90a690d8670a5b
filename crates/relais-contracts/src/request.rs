//! Inbound request types.
//!
//! History is carried by the caller on every request; nothing here is kept
//! between requests.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::{RelaisError, RelaisResult},
    mode::{Mode, PendingConfirmation},
};

/// Unique identifier for one chat request, echoed in the response and in
/// every journal record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub uuid::Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One prior turn of the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

/// Size limits applied before any other processing.
#[derive(Debug, Clone, Copy)]
pub struct RequestLimits {
    pub max_message_chars: usize,
    pub max_history: usize,
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            max_message_chars: 8000,
            max_history: 50,
        }
    }
}

/// The body of `POST /api/chat`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub history: Vec<ConversationTurn>,
    #[serde(default)]
    pub mode: Option<Mode>,
    /// Raw scope: `"kind"`, `"kind:id"`, `{ "kind", "id" }` or null.
    #[serde(default)]
    pub context_id: Option<Value>,
    #[serde(default)]
    pub confirmed_action: bool,
    #[serde(default)]
    pub confirmed_tool_call_id: Option<String>,
    /// The pending confirmation being approved, echoed back verbatim.
    #[serde(default)]
    pub pending_action: Option<PendingConfirmation>,
    #[serde(default)]
    pub stream: bool,
}

impl ChatRequest {
    /// A plain user message with no history, context or confirmation.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            history: Vec::new(),
            mode: None,
            context_id: None,
            confirmed_action: false,
            confirmed_tool_call_id: None,
            pending_action: None,
            stream: false,
        }
    }

    /// The effective mode; absent means the most conservative one.
    pub fn mode(&self) -> Mode {
        self.mode.unwrap_or_default()
    }

    /// Enforce the request-shape limits.
    pub fn check_shape(&self, limits: &RequestLimits) -> RelaisResult<()> {
        if self.message.trim().is_empty() {
            return Err(RelaisError::InvalidRequest {
                reason: "message must not be empty".to_string(),
                field: Some("message".to_string()),
            });
        }

        let chars = self.message.chars().count();
        if chars > limits.max_message_chars {
            return Err(RelaisError::InvalidRequest {
                reason: format!(
                    "message is {chars} characters, limit is {}",
                    limits.max_message_chars
                ),
                field: Some("message".to_string()),
            });
        }

        if self.history.len() > limits.max_history {
            return Err(RelaisError::InvalidRequest {
                reason: format!(
                    "history has {} turns, limit is {}",
                    self.history.len(),
                    limits.max_history
                ),
                field: Some("history".to_string()),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn message_length_bounds() {
        let limits = RequestLimits::default();

        assert!(ChatRequest::new("liste mes clients").check_shape(&limits).is_ok());
        assert!(ChatRequest::new("x".repeat(8000)).check_shape(&limits).is_ok());

        match ChatRequest::new("x".repeat(8001)).check_shape(&limits) {
            Err(RelaisError::InvalidRequest { field, .. }) => {
                assert_eq!(field.as_deref(), Some("message"));
            }
            other => panic!("expected InvalidRequest, got {:?}", other),
        }

        assert!(ChatRequest::new("   ").check_shape(&limits).is_err());
    }

    #[test]
    fn length_is_counted_in_characters_not_bytes() {
        let limits = RequestLimits { max_message_chars: 4, max_history: 1 };
        assert!(ChatRequest::new("éééé").check_shape(&limits).is_ok());
    }

    #[test]
    fn history_limit() {
        let limits = RequestLimits { max_message_chars: 100, max_history: 1 };
        let mut request = ChatRequest::new("bonjour");
        request.history = vec![
            ConversationTurn { role: Role::User, content: "a".into() },
            ConversationTurn { role: Role::Assistant, content: "b".into() },
        ];
        assert!(request.check_shape(&limits).is_err());
    }

    #[test]
    fn camel_case_body_and_mode_default() {
        let request: ChatRequest = serde_json::from_value(json!({
            "message": "liste mes clients",
            "contextId": "client:abc",
            "confirmedAction": false
        }))
        .unwrap();

        assert_eq!(request.mode(), Mode::Demander);
        assert_eq!(request.context_id, Some(json!("client:abc")));

        let ask: ChatRequest =
            serde_json::from_value(json!({ "message": "x", "mode": "ask" })).unwrap();
        assert_eq!(ask.mode(), Mode::Demander);

        let unknown = serde_json::from_value::<ChatRequest>(json!({ "message": "x", "mode": "yolo" }));
        assert!(unknown.is_err());
    }
}
