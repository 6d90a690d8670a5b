//! # relais-policy
//!
//! Execution policy for the relais runtime.
//!
//! ## Overview
//!
//! - [`ModeGate`] implements [`ConfirmationGate`](relais_core::traits::ConfirmationGate):
//!   the plan / auto / demander decision table and the confirmation handshake.
//! - [`ReadBeforeWriteGuard`] implements [`SafetyGuard`](relais_core::traits::SafetyGuard):
//!   mutating calls may only name identifiers already surfaced in the request.
//! - [`TokenSigner`] binds a held call to an HMAC token so a resubmission can
//!   be checked without server-side state.
//! - [`InMemoryConsumedTokens`] makes each token single-use.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use chrono::Duration;
//! use relais_policy::{InMemoryConsumedTokens, ModeGate, TokenSigner};
//!
//! let signer = TokenSigner::new(secret, Duration::minutes(10))?;
//! let gate = ModeGate::new(signer, Arc::new(InMemoryConsumedTokens::new(10_000)));
//! ```

pub mod gate;
pub mod guard;
pub mod store;
pub mod token;

pub use gate::ModeGate;
pub use guard::ReadBeforeWriteGuard;
pub use store::InMemoryConsumedTokens;
pub use token::TokenSigner;

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;
    use serde_json::json;

    use relais_contracts::{
        context::EntityKind,
        known::KnownEntityIdSet,
        tool::{EntityRef, ToolDefinition, ToolResult, ValidatedCall},
    };
    use relais_core::traits::{ConfirmationGate, SafetyGuard};

    use crate::{InMemoryConsumedTokens, ModeGate, ReadBeforeWriteGuard, TokenSigner};

    fn definitions() -> (ToolDefinition, ToolDefinition) {
        let list = ToolDefinition {
            name: "list_clients".to_string(),
            description: String::new(),
            mutates: false,
            destructive: false,
            reads_entity_ids: true,
            result_kind: Some(EntityKind::Client),
            entity_refs: vec![],
            arguments: json!({ "type": "object" }),
        };
        let update = ToolDefinition {
            name: "update_client".to_string(),
            description: String::new(),
            mutates: true,
            destructive: false,
            reads_entity_ids: false,
            result_kind: None,
            entity_refs: vec![EntityRef { field: "id".to_string(), kind: EntityKind::Client }],
            arguments: json!({ "type": "object" }),
        };
        (list, update)
    }

    /// Guard attestations survive the round-trip through a pending
    /// confirmation and satisfy the guard again on resubmission.
    #[test]
    fn attested_refs_satisfy_the_guard_on_resubmission() {
        let (list, update) = definitions();
        let guard = ReadBeforeWriteGuard::new();
        let signer = TokenSigner::new(b"k".to_vec(), Duration::minutes(10)).unwrap();
        let gate = ModeGate::new(signer, Arc::new(InMemoryConsumedTokens::new(8)));

        // First request: read, then propose the update.
        let mut known = KnownEntityIdSet::default();
        let listing = ToolResult::ok("1 client", Some(json!([{ "id": "abc" }])));
        known.extend(guard.harvest(&list, &listing));

        let call = ValidatedCall {
            id: "c2".to_string(),
            name: "update_client".to_string(),
            arguments: json!({ "id": "abc", "nom": "X" }),
        };
        let attested = guard.check(&update, &call, &known, None).unwrap();
        let pending = gate.issue(&call, attested).unwrap();

        // Second request: fresh known set, seeded only from the attestation.
        let redeemed = gate.redeem(Some(&pending.tool_call_id), Some(&pending)).unwrap();
        let mut fresh = KnownEntityIdSet::default();
        fresh.extend(pending.attested_refs.iter().cloned());

        let revalidated = ValidatedCall {
            id: redeemed.id.clone(),
            name: redeemed.name,
            arguments: redeemed.arguments,
        };
        assert!(guard.check(&update, &revalidated, &fresh, None).is_ok());
        assert!(gate.consume(&redeemed.id).is_ok());
    }
}
