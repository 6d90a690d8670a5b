//! Wiring: from a [`RelaisConfig`] to a ready [`Orchestrator`].
//!
//! Two setups share the same policy, audit and verification components:
//! the live one (OpenAI-compatible model, HTTP tool backend, catalogue from
//! disk) and the reference one (keyword model, in-memory CRM, embedded
//! catalogue) used by `serve --reference`.

use std::sync::Arc;

use tracing::{info, warn};

use relais_contracts::error::{RelaisError, RelaisResult};
use relais_core::{
    traits::{CallValidator, LanguageModel},
    Orchestrator, Supervisor, ToolDispatcher,
};
use relais_policy::{InMemoryConsumedTokens, ModeGate, ReadBeforeWriteGuard, TokenSigner};
use relais_ref_crm::{reference_dispatcher, CrmStore, KeywordModel, REFERENCE_CATALOGUE};
use relais_verify::ToolRegistry;

use crate::{backend::http_dispatcher, config::RelaisConfig, model::OpenAiModel};

/// The collaborators that differ between setups.
pub struct Components {
    pub model: Arc<dyn LanguageModel>,
    pub registry: ToolRegistry,
    pub dispatcher: ToolDispatcher,
    pub secret: Vec<u8>,
}

impl Components {
    pub fn live(config: &RelaisConfig) -> RelaisResult<Self> {
        let registry = ToolRegistry::from_file(&config.tools.catalogue)?;

        let backend_url = config.tools.backend_url.as_deref().ok_or_else(|| RelaisError::ConfigError {
            reason: "tools.backend_url is required outside reference mode".to_string(),
        })?;
        let dispatcher = http_dispatcher(
            backend_url,
            registry.definitions().into_iter().map(|definition| definition.name.as_str()),
        )?;

        let api_key = config.model_api_key();
        if api_key.is_none() {
            warn!(env = %config.model.api_key_env, "no model API key set, calling the endpoint without auth");
        }
        let model = Arc::new(OpenAiModel::new(&config.model, api_key)?);

        Ok(Self {
            model,
            registry,
            dispatcher,
            secret: config.confirmation_secret()?,
        })
    }

    pub fn reference(config: &RelaisConfig) -> RelaisResult<Self> {
        let registry = ToolRegistry::from_toml_str(REFERENCE_CATALOGUE)?;
        let dispatcher = reference_dispatcher(Arc::new(CrmStore::seeded()));

        let secret = config.confirmation_secret().unwrap_or_else(|_| {
            warn!(
                env = %config.confirmation.secret_env,
                "no confirmation secret set, using a per-process random one"
            );
            ephemeral_secret()
        });

        Ok(Self {
            model: Arc::new(KeywordModel::new()),
            registry,
            dispatcher,
            secret,
        })
    }
}

fn ephemeral_secret() -> Vec<u8> {
    let mut secret = uuid::Uuid::new_v4().as_bytes().to_vec();
    secret.extend_from_slice(uuid::Uuid::new_v4().as_bytes());
    secret
}

/// Assemble the orchestrator. Every catalogue tool must have a handler.
pub fn build_orchestrator(config: &RelaisConfig, components: Components) -> RelaisResult<Orchestrator> {
    let Components { model, registry, dispatcher, secret } = components;

    let missing: Vec<&str> = registry
        .definitions()
        .into_iter()
        .map(|definition| definition.name.as_str())
        .filter(|name| !dispatcher.handles(name))
        .collect();
    if !missing.is_empty() {
        return Err(RelaisError::ConfigError {
            reason: format!("no handler for catalogue tools: {}", missing.join(", ")),
        });
    }

    let signer = TokenSigner::new(secret, config.token_ttl())?;
    let gate = ModeGate::new(
        signer,
        Arc::new(InMemoryConsumedTokens::new(config.confirmation.store_capacity)),
    );

    info!(
        tools = registry.len(),
        max_iterations = config.orchestrator.max_iterations,
        request_deadline_ms = config.orchestrator.request_deadline_ms,
        "orchestrator ready"
    );

    Ok(Orchestrator::new(
        model,
        Arc::new(registry),
        Arc::new(ReadBeforeWriteGuard::new()),
        Arc::new(gate),
        dispatcher,
        Supervisor::new(config.supervisor_settings()),
        config.orchestrator_settings(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_setup_builds_without_any_environment() {
        let mut config = RelaisConfig::default();
        config.confirmation.secret_env = "RELAIS_TEST_UNSET_SECRET".to_string();

        let components = Components::reference(&config).unwrap();
        assert_eq!(components.secret.len(), 32);

        let orchestrator = build_orchestrator(&config, components).unwrap();
        assert_eq!(orchestrator.validator().definitions().len(), 14);
    }

    #[test]
    fn live_setup_requires_a_backend() {
        let mut config = RelaisConfig::default();
        config.tools.catalogue = concat!(env!("CARGO_MANIFEST_DIR"), "/../config/tools.toml").into();
        config.tools.backend_url = None;

        let err = Components::live(&config).err().unwrap();
        assert!(err.to_string().contains("backend_url"));
    }

    #[test]
    fn uncovered_tools_are_refused() {
        let config = RelaisConfig::default();
        let mut components = Components::reference(&config).unwrap();
        components.dispatcher = ToolDispatcher::new();

        let err = build_orchestrator(&config, components).err().unwrap();
        assert!(err.to_string().contains("list_clients"));
    }
}
