//! Scenario 3: read-before-write in `auto` mode.
//!
//! Without a context, a mutation naming an identifier nobody has seen yet is
//! refused before any handler runs. Once a read in the same request has
//! surfaced the identifier, the same mutation goes through.

use serde_json::json;

use relais_contracts::{error::RelaisResult, mode::Mode, request::ChatRequest};
use relais_core::model::ModelReply;

use super::{report, Reference};
use crate::model::call;

pub fn request(message: &str) -> ChatRequest {
    let mut request = ChatRequest::new(message);
    request.mode = Some(Mode::Auto);
    request
}

/// The model guesses an identifier straight away.
pub fn blind_script() -> Vec<ModelReply> {
    vec![ModelReply::calls(vec![call(
        "call_1",
        "update_client",
        json!({ "id": "def", "ville": "Aix-en-Provence" }),
    )])]
}

/// The model looks the client up first, then updates it.
pub fn read_first_script() -> Vec<ModelReply> {
    vec![
        ModelReply::calls(vec![call("call_1", "list_clients", json!({ "search": "durand" }))]),
        ModelReply::calls(vec![call(
            "call_2",
            "update_client",
            json!({ "id": "def", "ville": "Aix-en-Provence" }),
        )]),
        ModelReply::text("Durand & Fils est désormais à Aix-en-Provence."),
    ]
}

pub async fn run_scenario() -> RelaisResult<()> {
    println!("=== Scenario 3: read-before-write (auto) ===");
    println!();

    println!("  Case A: update_client(def) with nothing read");
    let reference = Reference::new(blind_script())?;
    let (envelope, journal) = reference.send(request("Durand a déménagé à Aix")).await;
    report(&envelope, &journal);
    println!("  Handler invocations: {}", reference.store.calls());
    println!();

    println!("  Case B: list_clients(durand), then update_client(def)");
    let reference = Reference::new(read_first_script())?;
    let (envelope, journal) = reference.send(request("Durand a déménagé à Aix")).await;
    report(&envelope, &journal);

    println!("  Scenario 3 complete.");
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
    async fn unseen_identifier_is_refused_without_dispatch() {
        let reference = Reference::new(blind_script()).unwrap();
        let (envelope, journal) = reference.send(request("Durand a déménagé")).await;

        let ChatResponse::Error { code, details, .. } = &envelope.response else {
            panic!("expected an error, got {:?}", envelope.response);
        };
        assert_eq!(*code, ReasonCode::UnverifiedReference);
        assert_eq!(details["tool"], "update_client");
        assert_eq!(details["field"], "id");
        assert_eq!(details["id"], "def");

        assert_eq!(reference.store.calls(), 0);
        assert_eq!(reference.store.client("def").unwrap().ville, "Marseille");

        let entries = journal.export().entries;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].record.decision, Decision::Rejected);
        assert_eq!(entries[0].record.code, Some(ReasonCode::UnverifiedReference));
    }

    #[tokio::test]
    async fn identifier_read_earlier_in_the_request_is_accepted() {
        let reference = Reference::new(read_first_script()).unwrap();
        let (envelope, journal) = reference.send(request("Durand a déménagé")).await;

        let ChatResponse::ToolResults { results, .. } = &envelope.response else {
            panic!("expected tool results, got {:?}", envelope.response);
        };
        let names: Vec<&str> = results.iter().map(|done| done.name.as_str()).collect();
        assert_eq!(names, ["list_clients", "update_client"]);
        assert_eq!(reference.store.client("def").unwrap().ville, "Aix-en-Provence");
        assert_eq!(journal.export().entries.len(), 2);
    }

    #[tokio::test]
    async fn foreign_keys_in_read_results_count_as_observed() {
        // list_deals returns `client_id` keys, which vouch for those clients.
        let reference = Reference::new(vec![
            ModelReply::calls(vec![call("call_1", "list_deals", json!({}))]),
            ModelReply::calls(vec![call(
                "call_2",
                "create_quote",
                json!({ "client_id": "ghi", "titre": "Application mobile", "montant_ht": 42000 }),
            )]),
            ModelReply::text("Devis créé."),
        ])
        .unwrap();

        let (envelope, _) = reference.send(request("fais un devis pour l'appli mobile")).await;
        let ChatResponse::ToolResults { results, .. } = &envelope.response else {
            panic!("expected tool results, got {:?}", envelope.response);
        };
        assert_eq!(results.len(), 2);
        assert!(results[1].result.success);
    }

    #[tokio::test]
    async fn failed_reads_surface_nothing() {
        let reference = Reference::new(vec![
            ModelReply::calls(vec![call("call_1", "get_client", json!({ "id": "zzz" }))]),
            ModelReply::calls(vec![call("call_2", "delete_client", json!({ "id": "zzz" }))]),
        ])
        .unwrap();

        let (envelope, _) = reference.send(request("supprime zzz")).await;
        assert!(matches!(
            envelope.response,
            ChatResponse::Error { code: ReasonCode::UnverifiedReference, .. }
        ));
    }

    #[tokio::test]
    async fn one_unseen_identifier_refuses_the_whole_reply() {
        let reference = Reference::new(vec![ModelReply::calls(vec![
            call("call_1", "update_client", json!({ "id": "abc", "nom": "X" })),
            call("call_2", "update_client", json!({ "id": "zzz", "nom": "Y" })),
        ])])
        .unwrap();
        let mut request = request("renomme les deux");
        request.context_id = Some(json!("client:abc"));

        let (envelope, journal) = reference.send(request).await;

        let ChatResponse::Error { code, details, results, .. } = &envelope.response else {
            panic!("expected an error, got {:?}", envelope.response);
        };
        assert_eq!(*code, ReasonCode::UnverifiedReference);
        assert_eq!(details["id"], "zzz");
        assert!(results.is_empty());

        assert_eq!(reference.store.calls(), 0);
        assert_eq!(reference.store.client("abc").unwrap().nom, "Acme Conseil");

        let decisions: Vec<Decision> =
            journal.export().entries.iter().map(|entry| entry.record.decision).collect();
        assert_eq!(decisions, [Decision::Skipped, Decision::Rejected]);
    }
}
