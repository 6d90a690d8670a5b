//! Scenario 1: read inside a client context.
//!
//! The user is on the fiche of client `abc` in `auto` mode and asks for the
//! client list. The model proposes `list_clients({})`, which executes; the
//! identifiers it returns become known for the rest of the request.

use serde_json::json;

use relais_contracts::{
    error::RelaisResult,
    mode::Mode,
    request::ChatRequest,
};
use relais_core::model::ModelReply;

use super::{report, Reference};
use crate::model::call;

pub fn request() -> ChatRequest {
    let mut request = ChatRequest::new("liste mes clients");
    request.mode = Some(Mode::Auto);
    request.context_id = Some(json!("client:abc"));
    request
}

pub fn script() -> Vec<ModelReply> {
    vec![
        ModelReply::calls(vec![call("call_1", "list_clients", json!({}))]),
        ModelReply::text("Vous avez trois clients : Acme Conseil, Durand & Fils et Atelier Girard."),
    ]
}

pub async fn run_scenario() -> RelaisResult<()> {
    println!("=== Scenario 1: list_clients in context client:abc (auto) ===");
    println!();

    let reference = Reference::new(script())?;
    let (envelope, journal) = reference.send(request()).await;
    report(&envelope, &journal);

    println!("  Scenario 1 complete.");
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use relais_contracts::{
        context::EntityKind,
        execution::{ChatResponse, Decision},
    };
    use relais_core::model::ModelTurn;

    use super::*;

    #[tokio::test]
    async fn list_clients_executes_and_is_assembled() {
        let reference = Reference::new(script()).unwrap();
        let (envelope, journal) = reference.send(request()).await;

        let ChatResponse::ToolResults { results, content } = &envelope.response else {
            panic!("expected tool results, got {:?}", envelope.response);
        };
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "list_clients");
        assert!(results[0].result.success);

        let data = results[0].result.data.as_ref().unwrap();
        assert!(data.as_array().unwrap().iter().any(|client| client["id"] == "abc"));
        assert!(content.as_deref().unwrap().contains("Acme"));

        assert_eq!(envelope.mode, Mode::Auto);
        let context = envelope.context_id.as_ref().unwrap();
        assert_eq!(context.kind, EntityKind::Client);
        assert_eq!(context.id.as_deref(), Some("abc"));

        let sealed = journal.export();
        assert_eq!(sealed.entries.len(), 1);
        assert_eq!(sealed.entries[0].record.decision, Decision::Executed);
        assert_eq!(envelope.journal.terminal_hash, sealed.terminal_hash);
        assert!(journal.verify_integrity());
        assert_eq!(reference.store.calls(), 1);
    }

    #[tokio::test]
    async fn the_model_sees_the_tool_output_on_its_second_turn() {
        let reference = Reference::new(script()).unwrap();
        reference.send(request()).await;

        let requests = reference.model.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].tools.len(), 14);
        assert!(matches!(
            requests[1].turns.last(),
            Some(ModelTurn::Tool { name, .. }) if name == "list_clients"
        ));
    }
}
