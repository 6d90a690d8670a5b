//! OpenAI-compatible chat-completions client.
//!
//! Translates the orchestrator's transcript into the `messages` / `tools`
//! wire format and the reply back into a [`ModelReply`]. Tool-call arguments
//! are passed through as the raw JSON string the endpoint produced; parsing
//! them is the validator's job.
//!
//! Failure classification feeds the supervisor's retry policy: network
//! errors, 429 and 5xx are transient, anything else is a rejection.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use relais_contracts::{
    error::{RelaisError, RelaisResult},
    tool::ToolCall,
};
use relais_core::{
    model::{ModelError, ModelReply, ModelRequest, ModelTurn},
    traits::LanguageModel,
};

use crate::config::ModelConfig;

/// Longest upstream error body kept in a `Rejected` message.
const MAX_ERROR_BODY: usize = 512;

pub struct OpenAiModel {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    system_prompt: Option<String>,
}

impl OpenAiModel {
    pub fn new(config: &ModelConfig, api_key: Option<String>) -> RelaisResult<Self> {
        let client = reqwest::Client::builder().build().map_err(|e| RelaisError::ConfigError {
            reason: format!("cannot build model HTTP client: {e}"),
        })?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key,
            system_prompt: config.system_prompt.clone(),
        })
    }

    /// The JSON body sent for `request`.
    fn body(&self, request: &ModelRequest) -> Value {
        let mut messages = Vec::with_capacity(request.turns.len() + 1);

        let mut system = self.system_prompt.clone().unwrap_or_default();
        if let Some(context) = &request.context {
            if !system.is_empty() {
                system.push_str("\n\n");
            }
            system.push_str(&format!("Contexte actif : {context}."));
        }
        if !system.is_empty() {
            messages.push(json!({ "role": "system", "content": system }));
        }

        messages.extend(request.turns.iter().map(wire_turn));

        let tools: Vec<Value> = request
            .tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    }
                })
            })
            .collect();

        let mut body = json!({ "model": self.model, "messages": messages });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools);
        }
        body
    }
}

fn wire_turn(turn: &ModelTurn) -> Value {
    match turn {
        ModelTurn::User { content } => json!({ "role": "user", "content": content }),
        ModelTurn::Assistant { content, tool_calls } if tool_calls.is_empty() => {
            json!({ "role": "assistant", "content": content })
        }
        ModelTurn::Assistant { content, tool_calls } => json!({
            "role": "assistant",
            "content": content,
            "tool_calls": tool_calls.iter().map(wire_call).collect::<Vec<_>>(),
        }),
        ModelTurn::Tool { tool_call_id, result, .. } => json!({
            "role": "tool",
            "tool_call_id": tool_call_id,
            "content": serde_json::to_string(result).unwrap_or_default(),
        }),
    }
}

fn wire_call(call: &ToolCall) -> Value {
    let arguments = match &call.arguments {
        Value::String(raw) => raw.clone(),
        other => other.to_string(),
    };
    json!({
        "id": call.id,
        "type": "function",
        "function": { "name": call.name, "arguments": arguments },
    })
}

// ── Response wire types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Completion {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireCall>,
}

#[derive(Debug, Deserialize)]
struct WireCall {
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: Option<String>,
}

fn into_reply(completion: Completion) -> Result<ModelReply, ModelError> {
    let choice = completion.choices.into_iter().next().ok_or_else(|| ModelError::Rejected {
        status: StatusCode::OK.as_u16(),
        message: "completion has no choices".to_string(),
    })?;

    Ok(ModelReply {
        content: choice.message.content.unwrap_or_default(),
        tool_calls: choice
            .message
            .tool_calls
            .into_iter()
            .map(|call| ToolCall {
                id: call.id,
                name: call.function.name,
                arguments: call.function.arguments.map(Value::String).unwrap_or(Value::Null),
            })
            .collect(),
    })
}

/// Classify a non-success HTTP status.
fn classify(status: StatusCode, body: &str) -> ModelError {
    let mut message: String = body.chars().take(MAX_ERROR_BODY).collect();
    if message.is_empty() {
        message = status.canonical_reason().unwrap_or("no body").to_string();
    }

    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        ModelError::Transient(format!("status {}: {message}", status.as_u16()))
    } else {
        ModelError::Rejected { status: status.as_u16(), message }
    }
}

#[async_trait]
impl LanguageModel for OpenAiModel {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelReply, ModelError> {
        let mut builder = self.client.post(&self.endpoint).json(&self.body(request));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ModelError::Transient(format!("model endpoint unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let error = classify(status, &body);
            warn!(status = status.as_u16(), error = %error, "model endpoint returned an error");
            return Err(error);
        }

        let completion: Completion = response.json().await.map_err(|e| ModelError::Rejected {
            status: status.as_u16(),
            message: format!("unreadable completion: {e}"),
        })?;

        let reply = into_reply(completion)?;
        debug!(tool_calls = reply.tool_calls.len(), "model completion received");
        Ok(reply)
    }
}
