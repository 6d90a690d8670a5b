//! In-memory CRM data for the reference runtime.
//!
//! All records are fictional and hardcoded. The store is mutable so that
//! the mutating tools have a visible effect, and it counts tool invocations
//! so scenarios can assert that a rejected call never reached a handler.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Client {
    pub id: String,
    pub nom: String,
    pub email: String,
    pub telephone: String,
    pub ville: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Contact {
    pub id: String,
    pub client_id: String,
    pub nom: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Deal {
    pub id: String,
    pub client_id: String,
    pub titre: String,
    pub stage: String,
    pub montant_ht: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mission {
    pub id: String,
    pub client_id: String,
    pub titre: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quote {
    pub id: String,
    pub client_id: String,
    pub titre: String,
    pub montant_ht: f64,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Proposal {
    pub id: String,
    pub deal_id: String,
    pub titre: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Invoice {
    pub id: String,
    pub client_id: String,
    pub numero: String,
    pub montant_ttc: f64,
    pub status: String,
}

/// Every table of the mock CRM, keyed by record id.
#[derive(Debug, Clone, Default)]
pub struct CrmData {
    pub clients: BTreeMap<String, Client>,
    pub contacts: BTreeMap<String, Contact>,
    pub deals: BTreeMap<String, Deal>,
    pub missions: BTreeMap<String, Mission>,
    pub quotes: BTreeMap<String, Quote>,
    pub proposals: BTreeMap<String, Proposal>,
    pub invoices: BTreeMap<String, Invoice>,
}

pub struct CrmStore {
    data: Mutex<CrmData>,
    next_id: AtomicU64,
    calls: AtomicU64,
}

impl CrmStore {
    pub fn new(data: CrmData) -> Self {
        Self {
            data: Mutex::new(data),
            next_id: AtomicU64::new(1),
            calls: AtomicU64::new(0),
        }
    }

    /// The fictional dataset used by every scenario and by `serve --reference`.
    pub fn seeded() -> Self {
        Self::new(seed())
    }

    pub(crate) fn data(&self) -> MutexGuard<'_, CrmData> {
        self.data.lock().expect("crm store lock poisoned")
    }

    /// A fresh id for a created record, e.g. `ct-new-1`.
    pub(crate) fn allocate(&self, prefix: &str) -> String {
        format!("{prefix}-new-{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn count_call(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of tool invocations that reached this store.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn client(&self, id: &str) -> Option<Client> {
        self.data().clients.get(id).cloned()
    }

    pub fn invoice(&self, id: &str) -> Option<Invoice> {
        self.data().invoices.get(id).cloned()
    }
}

// ── Seed ──────────────────────────────────────────────────────────────────────

fn seed() -> CrmData {
    let mut data = CrmData::default();

    for (id, nom, email, telephone, ville) in [
        ("abc", "Acme Conseil", "contact@acme-conseil.example", "01 23 45 67 89", "Lyon"),
        ("def", "Durand & Fils", "bonjour@durand-fils.example", "04 56 78 90 12", "Marseille"),
        ("ghi", "Atelier Girard", "atelier@girard.example", "05 61 22 33 44", "Toulouse"),
    ] {
        data.clients.insert(
            id.to_string(),
            Client {
                id: id.to_string(),
                nom: nom.to_string(),
                email: email.to_string(),
                telephone: telephone.to_string(),
                ville: ville.to_string(),
            },
        );
    }

    for (id, client_id, nom, email) in [
        ("ct1", "abc", "Claire Martin", Some("claire.martin@acme-conseil.example")),
        ("ct2", "abc", "Hugo Bernard", None),
        ("ct3", "def", "Léa Durand", Some("lea@durand-fils.example")),
    ] {
        data.contacts.insert(
            id.to_string(),
            Contact {
                id: id.to_string(),
                client_id: client_id.to_string(),
                nom: nom.to_string(),
                email: email.map(str::to_string),
            },
        );
    }

    for (id, client_id, titre, stage, montant_ht) in [
        ("d1", "abc", "Refonte du site vitrine", "proposition", 18_000.0),
        ("d2", "def", "Audit de sécurité", "qualification", 7_500.0),
        ("d3", "ghi", "Application mobile", "prospect", 42_000.0),
    ] {
        data.deals.insert(
            id.to_string(),
            Deal {
                id: id.to_string(),
                client_id: client_id.to_string(),
                titre: titre.to_string(),
                stage: stage.to_string(),
                montant_ht,
            },
        );
    }

    for (id, client_id, titre, status) in [
        ("m1", "abc", "Maintenance applicative", "en_cours"),
        ("m2", "def", "Migration de la messagerie", "terminee"),
    ] {
        data.missions.insert(
            id.to_string(),
            Mission {
                id: id.to_string(),
                client_id: client_id.to_string(),
                titre: titre.to_string(),
                status: status.to_string(),
            },
        );
    }

    data.quotes.insert(
        "q1".to_string(),
        Quote {
            id: "q1".to_string(),
            client_id: "abc".to_string(),
            titre: "Refonte du site vitrine".to_string(),
            montant_ht: 18_000.0,
            status: "brouillon".to_string(),
        },
    );

    data.proposals.insert(
        "p1".to_string(),
        Proposal {
            id: "p1".to_string(),
            deal_id: "d1".to_string(),
            titre: "Proposition technique v2".to_string(),
        },
    );

    for (id, client_id, numero, montant_ttc, status) in [
        ("inv1", "abc", "F-2026-001", 3_600.0, "payee"),
        ("inv2", "abc", "F-2026-002", 2_400.0, "brouillon"),
        ("inv3", "def", "F-2026-003", 9_000.0, "envoyee"),
    ] {
        data.invoices.insert(
            id.to_string(),
            Invoice {
                id: id.to_string(),
                client_id: client_id.to_string(),
                numero: numero.to_string(),
                montant_ttc,
                status: status.to_string(),
            },
        );
    }

    data
}
