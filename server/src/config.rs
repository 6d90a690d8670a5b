//! Server configuration.
//!
//! Loaded from a TOML file (`--config` or `RELAIS_CONFIG`). Every field has a
//! default, so an absent file or an empty one yields a runnable reference
//! setup. Secrets never live in the file: it names the environment variables
//! that hold them.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use relais_contracts::{
    error::{RelaisError, RelaisResult},
    request::RequestLimits,
};
use relais_core::{OrchestratorSettings, SupervisorSettings};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelaisConfig {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub tools: ToolsConfig,
    pub orchestrator: OrchestratorConfig,
    pub confirmation: ConfirmationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: "127.0.0.1:8080".to_string() }
    }
}

/// OpenAI-compatible chat-completions endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelConfig {
    pub endpoint: String,
    pub model: String,
    /// Environment variable holding the bearer token; unset means no auth.
    pub api_key_env: String,
    pub timeout_ms: u64,
    pub retry_delay_ms: u64,
    /// Prepended as a system turn when set.
    pub system_prompt: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "RELAIS_MODEL_API_KEY".to_string(),
            timeout_ms: 30_000,
            retry_delay_ms: 500,
            system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolsConfig {
    pub catalogue: PathBuf,
    /// Base URL of the business backend; tools are posted to `{url}/tools/{name}`.
    pub backend_url: Option<String>,
    pub timeout_ms: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            catalogue: PathBuf::from("config/tools.toml"),
            backend_url: None,
            timeout_ms: 15_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrchestratorConfig {
    pub max_iterations: usize,
    pub request_deadline_ms: u64,
    pub max_history: usize,
    pub max_message_chars: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        let settings = OrchestratorSettings::default();
        Self {
            max_iterations: settings.max_iterations,
            request_deadline_ms: settings.request_deadline.as_millis() as u64,
            max_history: settings.limits.max_history,
            max_message_chars: settings.limits.max_message_chars,
        }
    }
}

/// Longest accepted confirmation token lifetime: one day.
pub const MAX_TOKEN_TTL_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfirmationConfig {
    /// Environment variable holding the HMAC secret for confirmation tokens.
    pub secret_env: String,
    pub ttl_secs: u64,
    pub store_capacity: usize,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            secret_env: "RELAIS_CONFIRMATION_SECRET".to_string(),
            ttl_secs: 600,
            store_capacity: 10_000,
        }
    }
}

fn config_error(reason: impl Into<String>) -> RelaisError {
    RelaisError::ConfigError { reason: reason.into() }
}

impl RelaisConfig {
    /// Load from `path`, or return the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> RelaisResult<Self> {
        let Some(path) = path else {
            info!("no configuration file given, using defaults");
            return Ok(Self::default());
        };

        let content = std::fs::read_to_string(path)
            .map_err(|e| config_error(format!("cannot read {}: {e}", path.display())))?;
        let config = Self::from_toml_str(&content)?;
        info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn from_toml_str(s: &str) -> RelaisResult<Self> {
        let config: Self = toml::from_str(s).map_err(|e| config_error(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> RelaisResult<()> {
        self.bind_addr()?;

        let positive = [
            ("model.timeout_ms", self.model.timeout_ms),
            ("tools.timeout_ms", self.tools.timeout_ms),
            ("orchestrator.request_deadline_ms", self.orchestrator.request_deadline_ms),
            ("orchestrator.max_iterations", self.orchestrator.max_iterations as u64),
            ("orchestrator.max_message_chars", self.orchestrator.max_message_chars as u64),
            ("confirmation.ttl_secs", self.confirmation.ttl_secs),
            ("confirmation.store_capacity", self.confirmation.store_capacity as u64),
        ];
        if let Some((field, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(config_error(format!("{field} must be greater than zero")));
        }

        if self.confirmation.ttl_secs > MAX_TOKEN_TTL_SECS {
            return Err(config_error(format!(
                "confirmation.ttl_secs must be at most {MAX_TOKEN_TTL_SECS}"
            )));
        }

        if let Some(url) = &self.tools.backend_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(config_error(format!("tools.backend_url '{url}' is not an http(s) URL")));
            }
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> RelaisResult<SocketAddr> {
        self.server
            .bind
            .parse()
            .map_err(|e| config_error(format!("server.bind '{}': {e}", self.server.bind)))
    }

    pub fn supervisor_settings(&self) -> SupervisorSettings {
        SupervisorSettings {
            model_timeout: Duration::from_millis(self.model.timeout_ms),
            tool_timeout: Duration::from_millis(self.tools.timeout_ms),
            retry_delay: Duration::from_millis(self.model.retry_delay_ms),
        }
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            limits: RequestLimits {
                max_message_chars: self.orchestrator.max_message_chars,
                max_history: self.orchestrator.max_history,
            },
            max_iterations: self.orchestrator.max_iterations,
            request_deadline: Duration::from_millis(self.orchestrator.request_deadline_ms),
        }
    }

    pub fn token_ttl(&self) -> chrono::Duration {
        let secs = self.confirmation.ttl_secs.min(MAX_TOKEN_TTL_SECS);
        chrono::Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX))
    }

    /// The confirmation secret, read from the configured environment variable.
    pub fn confirmation_secret(&self) -> RelaisResult<Vec<u8>> {
        let name = &self.confirmation.secret_env;
        match std::env::var(name) {
            Ok(secret) if !secret.trim().is_empty() => Ok(secret.into_bytes()),
            _ => Err(config_error(format!("environment variable {name} is not set"))),
        }
    }

    pub fn model_api_key(&self) -> Option<String> {
        std::env::var(&self.model.api_key_env)
            .ok()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let config = RelaisConfig::from_toml_str("").unwrap();
        assert_eq!(config, RelaisConfig::default());
        assert_eq!(config.orchestrator.max_iterations, 6);
        assert_eq!(config.orchestrator_settings().request_deadline, Duration::from_secs(60));
        assert_eq!(config.supervisor_settings().model_timeout, Duration::from_secs(30));
        assert_eq!(config.supervisor_settings().tool_timeout, Duration::from_secs(15));
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = RelaisConfig::from_toml_str(
            r#"
            [orchestrator]
            max_iterations = 3

            [tools]
            backend_url = "http://localhost:9000"
            "#,
        )
        .unwrap();

        assert_eq!(config.orchestrator.max_iterations, 3);
        assert_eq!(config.orchestrator.max_history, 50);
        assert_eq!(config.tools.timeout_ms, 15_000);
        assert_eq!(config.tools.backend_url.as_deref(), Some("http://localhost:9000"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(RelaisConfig::from_toml_str("[server]\nbind = \"nowhere\"").is_err());
        assert!(RelaisConfig::from_toml_str("[orchestrator]\nmax_iterations = 0").is_err());
        assert!(RelaisConfig::from_toml_str("[tools]\nbackend_url = \"ftp://x\"").is_err());
        assert!(RelaisConfig::from_toml_str("[model]\nunknown = 1").is_err());
    }

    #[test]
    fn token_ttl_is_bounded_to_a_day() {
        let day = RelaisConfig::from_toml_str("[confirmation]\nttl_secs = 86400").unwrap();
        assert_eq!(day.token_ttl(), chrono::Duration::days(1));

        let err = RelaisConfig::from_toml_str("[confirmation]\nttl_secs = 86401").unwrap_err();
        assert!(err.to_string().contains("confirmation.ttl_secs"));

        let err = RelaisConfig::from_toml_str(&format!("[confirmation]\nttl_secs = {}", i64::MAX)).unwrap_err();
        assert!(err.to_string().contains("at most"));
    }

    #[test]
    fn load_reads_the_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nbind = \"0.0.0.0:9999\"").unwrap();

        let config = RelaisConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.bind_addr().unwrap().port(), 9999);

        assert!(RelaisConfig::load(Some(Path::new("/nonexistent/relais.toml"))).is_err());
    }

    #[test]
    fn missing_secret_is_a_config_error() {
        let mut config = RelaisConfig::default();
        config.confirmation.secret_env = "RELAIS_TEST_SECRET_THAT_IS_NEVER_SET".to_string();
        assert!(config.confirmation_secret().is_err());
    }
}
