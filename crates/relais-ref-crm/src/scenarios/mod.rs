//! CRM reference scenarios.
//!
//! Each scenario wires the real relais components (catalogue registry,
//! read-before-write guard, mode gate, hash-chained journal) around the mock
//! CRM and a scripted model, then drives one or more chat requests through
//! the orchestrator and prints what happened.

pub mod confirm_update;
pub mod guarded_write;
pub mod list_in_context;
pub mod plan_mode;
pub mod rejected_calls;

use std::sync::Arc;

use chrono::Duration;

use relais_audit::InMemoryJournal;
use relais_contracts::{
    error::RelaisResult,
    execution::{ChatResponse, ResponseEnvelope},
    request::{ChatRequest, RequestId},
};
use relais_core::{
    model::ModelReply, Orchestrator, OrchestratorSettings, Supervisor, SupervisorSettings,
};
use relais_policy::{InMemoryConsumedTokens, ModeGate, ReadBeforeWriteGuard, TokenSigner};
use relais_verify::ToolRegistry;

use crate::{handlers::reference_dispatcher, mock_data::CrmStore, model::ScriptedModel, REFERENCE_CATALOGUE};

const SCENARIO_SECRET: &[u8] = b"relais-reference-scenarios";

/// Real components around the mock CRM, with handles kept for inspection.
pub struct Reference {
    pub orchestrator: Orchestrator,
    pub store: Arc<CrmStore>,
    pub model: Arc<ScriptedModel>,
}

impl Reference {
    pub fn new(replies: Vec<ModelReply>) -> RelaisResult<Self> {
        let store = Arc::new(CrmStore::seeded());
        let model = Arc::new(ScriptedModel::new(replies));
        let registry = ToolRegistry::from_toml_str(REFERENCE_CATALOGUE)?;
        let signer = TokenSigner::new(SCENARIO_SECRET.to_vec(), Duration::minutes(10))?;
        let gate = ModeGate::new(signer, Arc::new(InMemoryConsumedTokens::new(1_000)));

        let orchestrator = Orchestrator::new(
            model.clone(),
            Arc::new(registry),
            Arc::new(ReadBeforeWriteGuard::new()),
            Arc::new(gate),
            reference_dispatcher(Arc::clone(&store)),
            Supervisor::new(SupervisorSettings::default()),
            OrchestratorSettings::default(),
        );

        Ok(Self { orchestrator, store, model })
    }

    /// Run one request with a fresh journal and return both.
    pub async fn send(&self, request: ChatRequest) -> (ResponseEnvelope, InMemoryJournal) {
        let request_id = RequestId::new();
        let journal = InMemoryJournal::new(request_id.to_string());
        let envelope = self.orchestrator.handle(&request_id, request, &journal, None).await;
        (envelope, journal)
    }
}

/// Print the response shape and the journal state of one request.
pub(crate) fn report(envelope: &ResponseEnvelope, journal: &InMemoryJournal) {
    match &envelope.response {
        ChatResponse::Message { content } => println!("  Response:  message: {content}"),
        ChatResponse::ToolResults { results, content } => {
            println!("  Response:  tool_results ({} call(s))", results.len());
            for executed in results {
                println!(
                    "    {} -> success={} \"{}\"",
                    executed.name, executed.result.success, executed.result.message
                );
            }
            if let Some(content) = content {
                println!("    content: {content}");
            }
        }
        ChatResponse::PendingConfirmation { pending, .. } => {
            println!("  Response:  pending_confirmation for {}", pending.name);
            println!("    token: {}", pending.tool_call_id);
        }
        ChatResponse::Plan { planned, .. } => {
            println!("  Response:  plan ({} call(s))", planned.len());
        }
        ChatResponse::Error { code, message, .. } => {
            println!("  Response:  error {code}: {message}");
        }
    }

    println!(
        "  Journal:   {} entr(y/ies), chain {}, terminal {}",
        envelope.journal.entries,
        if journal.verify_integrity() { "VERIFIED" } else { "BROKEN" },
        envelope.journal.terminal_hash.get(..16).unwrap_or_default()
    );
    println!();
}

/// Run every scenario in order.
pub async fn run_all() -> RelaisResult<()> {
    list_in_context::run_scenario().await?;
    confirm_update::run_scenario().await?;
    guarded_write::run_scenario().await?;
    rejected_calls::run_scenario().await?;
    plan_mode::run_scenario().await?;
    Ok(())
}
