//! HTTP tool backend.
//!
//! Each catalogue tool is forwarded as `POST {backend_url}/tools/{name}` with
//! the validated arguments as the JSON body. The backend answers with the
//! `{ success, message, data? }` envelope, which the dispatcher checks.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use relais_contracts::error::{RelaisError, RelaisResult};
use relais_core::{model::ToolFailure, traits::ToolHandler, ToolDispatcher};

pub struct HttpToolHandler {
    client: reqwest::Client,
    name: String,
    url: String,
}

impl HttpToolHandler {
    pub fn new(client: reqwest::Client, base_url: &str, name: &str) -> Self {
        Self {
            client,
            name: name.to_string(),
            url: format!("{}/tools/{name}", base_url.trim_end_matches('/')),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ToolHandler for HttpToolHandler {
    async fn call(&self, arguments: &Value) -> Result<Value, ToolFailure> {
        debug!(tool = %self.name, url = %self.url, "forwarding tool call");

        let response = self.client.post(&self.url).json(arguments).send().await.map_err(|e| {
            warn!(tool = %self.name, error = %e, "tool backend unreachable");
            ToolFailure::new("Le service métier est momentanément indisponible.")
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            warn!(tool = %self.name, error = %e, "tool backend body unreadable");
            ToolFailure::new("Le service métier a renvoyé une réponse illisible.")
        })?;

        // A non-JSON body is passed on as a string; the envelope check turns
        // it into a contract violation.
        let parsed = serde_json::from_str::<Value>(&body).unwrap_or(Value::String(body));

        if status.is_success() || parsed.is_object() {
            // Error statuses that still carry an envelope are business failures.
            return Ok(parsed);
        }

        warn!(tool = %self.name, status = status.as_u16(), "tool backend returned an error");
        Err(ToolFailure::new(format!(
            "Le service métier a refusé la demande (statut {}).",
            status.as_u16()
        )))
    }
}

/// A dispatcher forwarding every named tool to the backend.
pub fn http_dispatcher<'a>(
    base_url: &str,
    names: impl IntoIterator<Item = &'a str>,
) -> RelaisResult<ToolDispatcher> {
    let client = reqwest::Client::builder().build().map_err(|e| RelaisError::ConfigError {
        reason: format!("cannot build tool backend HTTP client: {e}"),
    })?;

    Ok(names.into_iter().fold(ToolDispatcher::new(), |dispatcher, name| {
        dispatcher.with(name, Arc::new(HttpToolHandler::new(client.clone(), base_url, name)))
    }))
}
