//! Tool handlers backed by the mock CRM store.
//!
//! Each catalogue tool maps to one operation over [`CrmStore`]. Operations
//! answer with the `{ success, message, data }` envelope; a missing record
//! is reported as a [`ToolFailure`] so the model can tell the user.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use relais_core::{model::ToolFailure, traits::ToolHandler, ToolDispatcher};

use crate::mock_data::{Contact, CrmStore, Quote};

type Operation = fn(&CrmStore, &Value) -> Result<Value, ToolFailure>;

/// One catalogue tool bound to the shared store.
pub struct CrmTool {
    name: &'static str,
    store: Arc<CrmStore>,
    operation: Operation,
}

#[async_trait]
impl ToolHandler for CrmTool {
    async fn call(&self, arguments: &Value) -> Result<Value, ToolFailure> {
        self.store.count_call();
        debug!(tool = self.name, "crm tool invoked");
        (self.operation)(&self.store, arguments)
    }
}

const OPERATIONS: [(&str, Operation); 14] = [
    ("list_clients", list_clients),
    ("get_client", get_client),
    ("update_client", update_client),
    ("delete_client", delete_client),
    ("list_contacts", list_contacts),
    ("create_contact", create_contact),
    ("list_deals", list_deals),
    ("update_deal_stage", update_deal_stage),
    ("list_missions", list_missions),
    ("list_quotes", list_quotes),
    ("create_quote", create_quote),
    ("list_proposals", list_proposals),
    ("list_invoices", list_invoices),
    ("send_invoice", send_invoice),
];

/// A dispatcher with a handler for every tool of the reference catalogue.
pub fn reference_dispatcher(store: Arc<CrmStore>) -> ToolDispatcher {
    OPERATIONS.iter().fold(ToolDispatcher::new(), |dispatcher, &(name, operation)| {
        dispatcher.with(
            name,
            Arc::new(CrmTool { name, store: Arc::clone(&store), operation }),
        )
    })
}

// ── Envelope helpers ──────────────────────────────────────────────────────────

fn done(message: impl Into<String>, data: impl Serialize) -> Result<Value, ToolFailure> {
    Ok(json!({ "success": true, "message": message.into(), "data": data }))
}

/// A business refusal that is not an error of the tool itself.
fn declined(message: impl Into<String>) -> Result<Value, ToolFailure> {
    Ok(json!({ "success": false, "message": message.into() }))
}

fn listing<T: Serialize>(items: Vec<T>, singular: &str, plural: &str) -> Result<Value, ToolFailure> {
    let message = match items.len() {
        0 => format!("Aucun {singular} trouvé."),
        1 => format!("1 {singular} trouvé."),
        n => format!("{n} {plural} trouvés."),
    };
    done(message, items)
}

fn text<'a>(arguments: &'a Value, key: &str) -> Option<&'a str> {
    arguments.get(key).and_then(Value::as_str)
}

fn required<'a>(arguments: &'a Value, key: &str) -> Result<&'a str, ToolFailure> {
    text(arguments, key).ok_or_else(|| ToolFailure::new(format!("Le champ {key} est obligatoire.")))
}

/// Keeps a record when the optional filter is absent or equal.
fn keep(filter: Option<&str>, value: &str) -> bool {
    filter.map_or(true, |wanted| wanted == value)
}

// ── Clients ───────────────────────────────────────────────────────────────────

fn list_clients(store: &CrmStore, arguments: &Value) -> Result<Value, ToolFailure> {
    let search = text(arguments, "search").map(str::to_lowercase);
    let clients: Vec<_> = store
        .data()
        .clients
        .values()
        .filter(|client| match &search {
            Some(needle) => {
                client.nom.to_lowercase().contains(needle.as_str())
                    || client.ville.to_lowercase().contains(needle.as_str())
            }
            None => true,
        })
        .cloned()
        .collect();
    listing(clients, "client", "clients")
}

fn get_client(store: &CrmStore, arguments: &Value) -> Result<Value, ToolFailure> {
    let id = required(arguments, "id")?;
    match store.data().clients.get(id) {
        Some(client) => done(format!("Fiche du client {}.", client.nom), client),
        None => Err(ToolFailure::new(format!("Client introuvable : {id}."))),
    }
}

fn update_client(store: &CrmStore, arguments: &Value) -> Result<Value, ToolFailure> {
    let id = required(arguments, "id")?;
    let mut data = store.data();
    let client = data
        .clients
        .get_mut(id)
        .ok_or_else(|| ToolFailure::new(format!("Client introuvable : {id}.")))?;

    let mut changed = Vec::new();
    for (key, slot) in [
        ("nom", &mut client.nom),
        ("email", &mut client.email),
        ("telephone", &mut client.telephone),
        ("ville", &mut client.ville),
    ] {
        if let Some(value) = text(arguments, key) {
            *slot = value.to_string();
            changed.push(key);
        }
    }

    if changed.is_empty() {
        return declined("Aucune modification demandée.");
    }
    done(
        format!("Client {} mis à jour ({}).", client.nom, changed.join(", ")),
        client.clone(),
    )
}

fn delete_client(store: &CrmStore, arguments: &Value) -> Result<Value, ToolFailure> {
    let id = required(arguments, "id")?;
    let mut data = store.data();
    let client = data
        .clients
        .remove(id)
        .ok_or_else(|| ToolFailure::new(format!("Client introuvable : {id}.")))?;
    data.contacts.retain(|_, contact| contact.client_id != id);
    done(format!("Client {} supprimé.", client.nom), json!({ "id": client.id }))
}

// ── Contacts ──────────────────────────────────────────────────────────────────

fn list_contacts(store: &CrmStore, arguments: &Value) -> Result<Value, ToolFailure> {
    let client_id = text(arguments, "client_id");
    let contacts: Vec<_> = store
        .data()
        .contacts
        .values()
        .filter(|contact| keep(client_id, &contact.client_id))
        .cloned()
        .collect();
    listing(contacts, "contact", "contacts")
}

fn create_contact(store: &CrmStore, arguments: &Value) -> Result<Value, ToolFailure> {
    let client_id = required(arguments, "client_id")?;
    let nom = required(arguments, "nom")?;
    let id = store.allocate("ct");

    let mut data = store.data();
    let client_nom = match data.clients.get(client_id) {
        Some(client) => client.nom.clone(),
        None => return Err(ToolFailure::new(format!("Client introuvable : {client_id}."))),
    };

    let contact = Contact {
        id: id.clone(),
        client_id: client_id.to_string(),
        nom: nom.to_string(),
        email: text(arguments, "email").map(str::to_string),
    };
    data.contacts.insert(id, contact.clone());
    done(format!("Contact {nom} ajouté chez {client_nom}."), contact)
}

// ── Deals ─────────────────────────────────────────────────────────────────────

fn list_deals(store: &CrmStore, arguments: &Value) -> Result<Value, ToolFailure> {
    let client_id = text(arguments, "client_id");
    let deals: Vec<_> = store
        .data()
        .deals
        .values()
        .filter(|deal| keep(client_id, &deal.client_id))
        .cloned()
        .collect();
    listing(deals, "opportunité", "opportunités")
}

fn update_deal_stage(store: &CrmStore, arguments: &Value) -> Result<Value, ToolFailure> {
    let id = required(arguments, "id")?;
    let stage = required(arguments, "stage")?;
    let mut data = store.data();
    let deal = data
        .deals
        .get_mut(id)
        .ok_or_else(|| ToolFailure::new(format!("Opportunité introuvable : {id}.")))?;

    if deal.stage == stage {
        return declined(format!("L'opportunité {} est déjà à l'étape {stage}.", deal.titre));
    }
    deal.stage = stage.to_string();
    done(format!("Opportunité {} passée à l'étape {stage}.", deal.titre), deal.clone())
}

// ── Missions, quotes, proposals ───────────────────────────────────────────────

fn list_missions(store: &CrmStore, arguments: &Value) -> Result<Value, ToolFailure> {
    let client_id = text(arguments, "client_id");
    let status = text(arguments, "status");
    let missions: Vec<_> = store
        .data()
        .missions
        .values()
        .filter(|mission| keep(client_id, &mission.client_id) && keep(status, &mission.status))
        .cloned()
        .collect();
    listing(missions, "mission", "missions")
}

fn list_quotes(store: &CrmStore, arguments: &Value) -> Result<Value, ToolFailure> {
    let client_id = text(arguments, "client_id");
    let quotes: Vec<_> = store
        .data()
        .quotes
        .values()
        .filter(|quote| keep(client_id, &quote.client_id))
        .cloned()
        .collect();
    listing(quotes, "devis", "devis")
}

fn create_quote(store: &CrmStore, arguments: &Value) -> Result<Value, ToolFailure> {
    let client_id = required(arguments, "client_id")?;
    let titre = required(arguments, "titre")?;
    let montant_ht = arguments
        .get("montant_ht")
        .and_then(Value::as_f64)
        .ok_or_else(|| ToolFailure::new("Le champ montant_ht est obligatoire."))?;
    let id = store.allocate("q");

    let mut data = store.data();
    if !data.clients.contains_key(client_id) {
        return Err(ToolFailure::new(format!("Client introuvable : {client_id}.")));
    }

    let quote = Quote {
        id: id.clone(),
        client_id: client_id.to_string(),
        titre: titre.to_string(),
        montant_ht,
        status: "brouillon".to_string(),
    };
    data.quotes.insert(id, quote.clone());
    done(format!("Devis « {titre} » créé en brouillon ({montant_ht:.2} € HT)."), quote)
}

fn list_proposals(store: &CrmStore, arguments: &Value) -> Result<Value, ToolFailure> {
    let deal_id = text(arguments, "deal_id");
    let proposals: Vec<_> = store
        .data()
        .proposals
        .values()
        .filter(|proposal| keep(deal_id, &proposal.deal_id))
        .cloned()
        .collect();
    listing(proposals, "proposition", "propositions")
}

// ── Invoices ──────────────────────────────────────────────────────────────────

fn list_invoices(store: &CrmStore, arguments: &Value) -> Result<Value, ToolFailure> {
    let client_id = text(arguments, "client_id");
    let status = text(arguments, "status");
    let invoices: Vec<_> = store
        .data()
        .invoices
        .values()
        .filter(|invoice| keep(client_id, &invoice.client_id) && keep(status, &invoice.status))
        .cloned()
        .collect();
    listing(invoices, "facture", "factures")
}

fn send_invoice(store: &CrmStore, arguments: &Value) -> Result<Value, ToolFailure> {
    let id = required(arguments, "id")?;
    let mut data = store.data();
    let invoice = data
        .invoices
        .get_mut(id)
        .ok_or_else(|| ToolFailure::new(format!("Facture introuvable : {id}.")))?;

    if invoice.status != "brouillon" {
        return declined(format!(
            "La facture {} n'est pas un brouillon (statut : {}).",
            invoice.numero, invoice.status
        ));
    }
    invoice.status = "envoyee".to_string();
    done(format!("Facture {} envoyée.", invoice.numero), invoice.clone())
}

#[cfg(test)]
mod tests {
    use relais_core::{dispatcher::enforce_envelope, traits::CallValidator};

    use super::*;
    use crate::REFERENCE_CATALOGUE;

    fn run(operation: Operation, store: &CrmStore, arguments: Value) -> Value {
        operation(store, &arguments).unwrap()
    }

    #[test]
    fn every_catalogue_tool_has_a_handler() {
        let registry = relais_verify::ToolRegistry::from_toml_str(REFERENCE_CATALOGUE).unwrap();
        let dispatcher = reference_dispatcher(Arc::new(CrmStore::seeded()));

        for definition in registry.definitions() {
            assert!(dispatcher.handles(&definition.name), "{}", definition.name);
        }
        assert_eq!(dispatcher.names().count(), registry.len());
    }

    #[test]
    fn results_satisfy_the_envelope() {
        let store = CrmStore::seeded();
        for (name, operation) in OPERATIONS {
            if let Ok(raw) = operation(&store, &json!({ "id": "abc", "client_id": "abc" })) {
                assert!(enforce_envelope(name, raw).is_ok(), "{name}");
            }
        }
    }

    #[test]
    fn list_clients_filters_by_name_or_city() {
        let store = CrmStore::seeded();

        let all = run(list_clients, &store, json!({}));
        assert_eq!(all["data"].as_array().unwrap().len(), 3);

        let lyon = run(list_clients, &store, json!({ "search": "lyon" }));
        assert_eq!(lyon["data"][0]["id"], "abc");
        assert_eq!(lyon["message"], "1 client trouvé.");
    }

    #[test]
    fn update_client_changes_only_given_fields() {
        let store = CrmStore::seeded();
        let before = store.client("abc").unwrap();

        let result = run(update_client, &store, json!({ "id": "abc", "nom": "Acme Group" }));
        assert_eq!(result["success"], true);

        let after = store.client("abc").unwrap();
        assert_eq!(after.nom, "Acme Group");
        assert_eq!(after.ville, before.ville);
    }

    #[test]
    fn update_client_without_changes_is_declined() {
        let store = CrmStore::seeded();
        let result = run(update_client, &store, json!({ "id": "abc" }));
        assert_eq!(result["success"], false);
    }

    #[test]
    fn missing_records_are_tool_failures() {
        let store = CrmStore::seeded();
        let failure = get_client(&store, &json!({ "id": "zzz" })).unwrap_err();
        assert!(failure.message.contains("zzz"));
        assert!(send_invoice(&store, &json!({ "id": "nope" })).is_err());
    }

    #[test]
    fn send_invoice_only_sends_drafts() {
        let store = CrmStore::seeded();

        let sent = run(send_invoice, &store, json!({ "id": "inv2" }));
        assert_eq!(sent["success"], true);
        assert_eq!(store.invoice("inv2").unwrap().status, "envoyee");

        let again = run(send_invoice, &store, json!({ "id": "inv2" }));
        assert_eq!(again["success"], false);
    }

    #[test]
    fn create_quote_starts_as_draft() {
        let store = CrmStore::seeded();
        let result = run(
            create_quote,
            &store,
            json!({ "client_id": "def", "titre": "Audit", "montant_ht": 1200 }),
        );
        assert_eq!(result["data"]["status"], "brouillon");
        assert_eq!(result["data"]["client_id"], "def");
    }

    #[tokio::test]
    async fn handler_calls_are_counted() {
        let store = Arc::new(CrmStore::seeded());
        let tool = CrmTool {
            name: "list_deals",
            store: Arc::clone(&store),
            operation: list_deals,
        };
        tool.call(&json!({ "client_id": "abc" })).await.unwrap();
        assert_eq!(store.calls(), 1);
    }
}
