//! Scenario 4: calls that never reach a handler.
//!
//! A model proposes an unknown tool, an unparseable payload, and arguments
//! that break the schema. Each ends the request with a typed error naming
//! the tool and, where relevant, the field, and the CRM is never touched.

use serde_json::{json, Value};

use relais_contracts::{error::RelaisResult, mode::Mode, request::ChatRequest};
use relais_core::model::ModelReply;

use super::{report, Reference};
use crate::model::call;

pub struct Case {
    pub label: &'static str,
    pub name: &'static str,
    pub arguments: Value,
}

pub fn cases() -> Vec<Case> {
    vec![
        Case {
            label: "unknown tool",
            name: "export_database",
            arguments: json!({}),
        },
        Case {
            label: "malformed arguments",
            name: "list_invoices",
            arguments: json!("{\"status\": "),
        },
        Case {
            label: "argument outside its enum",
            name: "list_invoices",
            arguments: json!({ "status": "annulee" }),
        },
        Case {
            label: "undeclared argument",
            name: "list_clients",
            arguments: json!({ "search": "acme", "limit": 5 }),
        },
    ]
}

pub fn request() -> ChatRequest {
    let mut request = ChatRequest::new("montre-moi les factures");
    request.mode = Some(Mode::Auto);
    request.context_id = Some(json!("client:abc"));
    request
}

fn script(case: &Case) -> Vec<ModelReply> {
    vec![ModelReply::calls(vec![call("call_1", case.name, case.arguments.clone())])]
}

pub async fn run_scenario() -> RelaisResult<()> {
    println!("=== Scenario 4: rejected tool calls ===");
    println!();

    for case in cases() {
        println!("  Case: {} ({})", case.label, case.name);
        let reference = Reference::new(script(&case))?;
        let (envelope, journal) = reference.send(request()).await;
        report(&envelope, &journal);
    }

    println!("  Scenario 4 complete.");
    println!();
    Ok(())
}
