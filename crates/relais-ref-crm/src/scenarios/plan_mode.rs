//! Scenario 5: `plan` mode.
//!
//! The model proposes a read and a destructive call. Both are validated and
//! described; neither executes, and the guard is not consulted, so the
//! unseen invoice id does not make the plan fail.

use serde_json::json;

use relais_contracts::{error::RelaisResult, mode::Mode, request::ChatRequest};
use relais_core::model::ModelReply;

use super::{report, Reference};
use crate::model::call;

pub fn request() -> ChatRequest {
    let mut request = ChatRequest::new("que ferais-tu pour envoyer la facture brouillon d'Acme ?");
    request.mode = Some(Mode::Plan);
    request.context_id = Some(json!("client:abc"));
    request
}

pub fn script() -> Vec<ModelReply> {
    vec![ModelReply {
        content: "Je listerais les brouillons d'Acme puis j'enverrais la facture inv2.".to_string(),
        tool_calls: vec![
            call("call_1", "list_invoices", json!({ "client_id": "abc", "status": "brouillon" })),
            call("call_2", "send_invoice", json!({ "id": "inv2" })),
        ],
    }]
}

pub async fn run_scenario() -> RelaisResult<()> {
    println!("=== Scenario 5: plan mode ===");
    println!();

    let reference = Reference::new(script())?;
    let (envelope, journal) = reference.send(request()).await;
    report(&envelope, &journal);
    println!("  Handler invocations: {}", reference.store.calls());
    println!();

    println!("  Scenario 5 complete.");
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use relais_contracts::{
        error::ReasonCode,
        execution::{ChatResponse, Decision},
    };

    use super::*;

    #[tokio::test]
    async fn plan_lists_calls_and_executes_nothing() {
        let reference = Reference::new(script()).unwrap();
        let (envelope, journal) = reference.send(request()).await;

        let ChatResponse::Plan { planned, content } = &envelope.response else {
            panic!("expected a plan, got {:?}", envelope.response);
        };
        assert_eq!(planned.len(), 2);
        assert!(!planned[0].mutates);
        assert!(planned[1].mutates);
        assert!(content.is_some());

        assert_eq!(reference.store.calls(), 0);
        assert_eq!(reference.store.invoice("inv2").unwrap().status, "brouillon");
        assert_eq!(reference.model.requests().len(), 1);

        let decisions: Vec<Decision> =
            journal.export().entries.iter().map(|entry| entry.record.decision).collect();
        assert_eq!(decisions, [Decision::Planned, Decision::Planned]);
    }

    #[tokio::test]
    async fn plan_still_validates_arguments() {
        let reference = Reference::new(vec![ModelReply::calls(vec![call(
            "call_1",
            "update_deal_stage",
            json!({ "id": "d1", "stage": "signe" }),
        )])])
        .unwrap();

        let (envelope, _) = reference.send(request()).await;
        assert!(matches!(
            envelope.response,
            ChatResponse::Error { code: ReasonCode::InvalidArguments, .. }
        ));
    }
}
