//! Scenario 2: confirmation handshake in `demander` mode.
//!
//! The model proposes `update_client({ id: "abc", nom: "X" })` while the user
//! is on client `abc`. The call is held and a bound token returned. The
//! client resubmits with `confirmedAction` and the token; the call executes
//! exactly once, and a replay of the same confirmation is refused.

use serde_json::json;

use relais_contracts::{
    error::RelaisResult,
    execution::ChatResponse,
    mode::{Mode, PendingConfirmation},
    request::ChatRequest,
};
use relais_core::model::ModelReply;

use super::{report, Reference};
use crate::model::call;

pub fn request() -> ChatRequest {
    let mut request = ChatRequest::new("renomme ce client en X");
    request.mode = Some(Mode::Demander);
    request.context_id = Some(json!("client:abc"));
    request
}

pub fn script() -> Vec<ModelReply> {
    vec![ModelReply {
        content: "Je vais renommer le client en X.".to_string(),
        tool_calls: vec![call("call_1", "update_client", json!({ "id": "abc", "nom": "X" }))],
    }]
}

/// The resubmission a client sends once the user approved `pending`.
pub fn confirmation(pending: &PendingConfirmation) -> ChatRequest {
    let mut request = ChatRequest::new("oui, confirme");
    request.mode = Some(Mode::Demander);
    request.context_id = Some(json!("client:abc"));
    request.confirmed_action = true;
    request.confirmed_tool_call_id = Some(pending.tool_call_id.clone());
    request.pending_action = Some(pending.clone());
    request
}

pub async fn run_scenario() -> RelaisResult<()> {
    println!("=== Scenario 2: update_client held in demander mode, then confirmed ===");
    println!();

    let reference = Reference::new(script())?;

    println!("  Step 1: model proposes update_client(abc, nom=X)");
    let (envelope, journal) = reference.send(request()).await;
    report(&envelope, &journal);

    let ChatResponse::PendingConfirmation { pending, .. } = envelope.response else {
        println!("  Unexpected response, scenario aborted.");
        return Ok(());
    };

    println!("  Step 2: user confirms");
    let (envelope, journal) = reference.send(confirmation(&pending)).await;
    report(&envelope, &journal);

    println!("  Step 3: same confirmation replayed");
    let (envelope, journal) = reference.send(confirmation(&pending)).await;
    report(&envelope, &journal);

    println!("  Scenario 2 complete.");
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use relais_contracts::{
        context::EntityKind,
        error::ReasonCode,
        execution::Decision,
        known::KnownEntity,
    };

    use super::*;

    async fn held(reference: &Reference) -> PendingConfirmation {
        let (envelope, journal) = reference.send(request()).await;
        let ChatResponse::PendingConfirmation { pending, content, .. } = envelope.response else {
            panic!("expected a pending confirmation, got {:?}", envelope.response);
        };
        assert_eq!(content.as_deref(), Some("Je vais renommer le client en X."));
        assert_eq!(journal.export().entries[0].record.decision, Decision::Held);
        pending
    }

    #[tokio::test]
    async fn mutation_is_held_not_executed() {
        let reference = Reference::new(script()).unwrap();
        let pending = held(&reference).await;

        assert_eq!(pending.name, "update_client");
        assert_eq!(pending.arguments, json!({ "id": "abc", "nom": "X" }));
        assert!(pending.tool_call_id.starts_with("tc_"));
        assert_eq!(pending.attested_refs, vec![KnownEntity::new(EntityKind::Client, "abc")]);

        assert_eq!(reference.store.calls(), 0);
        assert_eq!(reference.store.client("abc").unwrap().nom, "Acme Conseil");
    }

    #[tokio::test]
    async fn confirmation_executes_once_without_the_model() {
        let reference = Reference::new(script()).unwrap();
        let pending = held(&reference).await;

        let (envelope, journal) = reference.send(confirmation(&pending)).await;
        let ChatResponse::ToolResults { results, content } = &envelope.response else {
            panic!("expected tool results, got {:?}", envelope.response);
        };
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].tool_call_id, pending.tool_call_id);
        assert!(results[0].result.success);
        assert_eq!(content.as_deref(), Some(results[0].result.message.as_str()));

        assert_eq!(reference.store.client("abc").unwrap().nom, "X");
        assert_eq!(reference.store.calls(), 1);
        assert_eq!(reference.model.requests().len(), 1);
        assert_eq!(journal.export().entries[0].record.decision, Decision::Executed);
    }

    #[tokio::test]
    async fn replayed_confirmation_is_a_mismatch() {
        let reference = Reference::new(script()).unwrap();
        let pending = held(&reference).await;

        reference.send(confirmation(&pending)).await;
        let (envelope, _) = reference.send(confirmation(&pending)).await;

        let ChatResponse::Error { code, .. } = envelope.response else {
            panic!("expected an error, got {:?}", envelope.response);
        };
        assert_eq!(code, ReasonCode::ConfirmationMismatch);
        assert_eq!(reference.store.calls(), 1);
    }

    #[tokio::test]
    async fn edited_arguments_are_refused() {
        let reference = Reference::new(script()).unwrap();
        let mut pending = held(&reference).await;
        pending.arguments = json!({ "id": "def", "nom": "X" });

        let (envelope, _) = reference.send(confirmation(&pending)).await;
        assert!(matches!(
            envelope.response,
            ChatResponse::Error { code: ReasonCode::ConfirmationMismatch, .. }
        ));
        assert_eq!(reference.store.calls(), 0);
    }

    #[tokio::test]
    async fn attested_refs_replace_the_context_on_resubmission() {
        let reference = Reference::new(script()).unwrap();
        let pending = held(&reference).await;

        // The user navigated away; the attestation alone vouches for `abc`.
        let mut resubmission = confirmation(&pending);
        resubmission.context_id = None;

        let (envelope, _) = reference.send(resubmission).await;
        assert!(matches!(envelope.response, ChatResponse::ToolResults { .. }));
        assert_eq!(reference.store.client("abc").unwrap().nom, "X");
    }
}
