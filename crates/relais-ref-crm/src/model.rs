//! Language models that need no network.
//!
//! [`ScriptedModel`] replays a fixed list of replies and records what it was
//! asked; scenarios use it to drive the orchestrator deterministically.
//! [`KeywordModel`] maps a few French keywords onto catalogue tools so that
//! `serve --reference` can be exercised end to end without a model endpoint.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use relais_contracts::{context::EntityKind, tool::ToolCall};
use relais_core::{
    model::{ModelError, ModelReply, ModelRequest, ModelTurn},
    traits::LanguageModel,
};

// ── Scripted ──────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct ScriptedModel {
    replies: Mutex<VecDeque<ModelReply>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<ModelReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every request received so far, oldest first.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().expect("model lock poisoned").clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelReply, ModelError> {
        self.requests.lock().expect("model lock poisoned").push(request.clone());
        // An exhausted script ends the conversation with plain text.
        Ok(self
            .replies
            .lock()
            .expect("model lock poisoned")
            .pop_front()
            .unwrap_or_else(|| ModelReply::text("C'est fait.")))
    }
}

/// Shorthand for a tool call in a script.
pub fn call(id: &str, name: &str, arguments: Value) -> ToolCall {
    ToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments,
    }
}

// ── Keyword ───────────────────────────────────────────────────────────────────

/// A toy model: one tool per recognised keyword, then a summary of the
/// results once tool outputs come back.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordModel;

impl KeywordModel {
    pub fn new() -> Self {
        Self
    }

    fn propose(&self, request: &ModelRequest, message: &str) -> ModelReply {
        let text = message.to_lowercase();
        let client = request
            .context
            .as_ref()
            .filter(|ctx| ctx.kind == EntityKind::Client)
            .and_then(|ctx| ctx.id.clone());
        let scoped = |key: &str| match &client {
            Some(id) => json!({ key: id }),
            None => json!({}),
        };
        let id = format!("call_{}", request.turns.len());

        let (name, arguments) = if text.contains("renomme") {
            let Some(client) = &client else {
                return ModelReply::text("Ouvrez d'abord la fiche du client à renommer.");
            };
            let nom = message
                .rsplit_once(" en ")
                .map(|(_, nom)| nom.trim().trim_end_matches('.').to_string())
                .filter(|nom| !nom.is_empty());
            let Some(nom) = nom else {
                return ModelReply::text("Quel nouveau nom voulez-vous donner au client ?");
            };
            ("update_client", json!({ "id": client, "nom": nom }))
        } else if text.contains("supprime") {
            let Some(client) = &client else {
                return ModelReply::text("Ouvrez d'abord la fiche du client à supprimer.");
            };
            ("delete_client", json!({ "id": client }))
        } else if text.contains("facture") {
            ("list_invoices", scoped("client_id"))
        } else if text.contains("contact") {
            ("list_contacts", scoped("client_id"))
        } else if text.contains("opportunit") || text.contains("deal") {
            ("list_deals", scoped("client_id"))
        } else if text.contains("mission") {
            ("list_missions", scoped("client_id"))
        } else if text.contains("devis") {
            ("list_quotes", scoped("client_id"))
        } else if text.contains("client") {
            ("list_clients", json!({}))
        } else {
            return ModelReply::text(
                "Je peux lister vos clients, contacts, opportunités, missions, devis et factures.",
            );
        };

        ModelReply::calls(vec![call(&id, name, arguments)])
    }
}

#[async_trait]
impl LanguageModel for KeywordModel {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelReply, ModelError> {
        // Tool outputs after the last user turn mean the calls already ran.
        let mut summaries = Vec::new();
        for turn in request.turns.iter().rev() {
            match turn {
                ModelTurn::Tool { result, .. } => summaries.push(result.message.clone()),
                ModelTurn::Assistant { .. } => continue,
                ModelTurn::User { content } => {
                    if summaries.is_empty() {
                        return Ok(self.propose(request, content));
                    }
                    break;
                }
            }
        }

        if summaries.is_empty() {
            return Ok(ModelReply::text("Bonjour ! Que puis-je faire pour vous ?"));
        }
        summaries.reverse();
        Ok(ModelReply::text(summaries.join(" ")))
    }
}
