//! The mode gate: per-request execution policy and the confirmation handshake.
//!
//! Decision table for a validated, guard-approved call:
//!
//! | mode       | read    | mutating | destructive |
//! |------------|---------|----------|-------------|
//! | `plan`     | describe| describe | describe    |
//! | `auto`     | execute | execute  | hold        |
//! | `demander` | execute | hold     | hold        |
//!
//! A held call is returned with an HMAC-bound token. The gate keeps no
//! record of what it issued; it only remembers which tokens were spent.

use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, info, warn};

use relais_contracts::{
    error::{RelaisError, RelaisResult},
    known::KnownEntity,
    mode::{GateVerdict, Mode, PendingConfirmation},
    tool::{ToolCall, ToolDefinition, ValidatedCall},
};
use relais_core::traits::{ConfirmationGate, ConsumedTokenStore};

use crate::token::{Binding, ParsedToken, TokenSigner};

pub struct ModeGate {
    signer: TokenSigner,
    consumed: Arc<dyn ConsumedTokenStore>,
}

impl ModeGate {
    pub fn new(signer: TokenSigner, consumed: Arc<dyn ConsumedTokenStore>) -> Self {
        Self { signer, consumed }
    }

    pub fn ttl(&self) -> Duration {
        self.signer.ttl()
    }
}

fn mismatch(reason: &str) -> RelaisError {
    RelaisError::ConfirmationMismatch { reason: reason.to_string() }
}

impl ConfirmationGate for ModeGate {
    fn decide(&self, mode: Mode, definition: &ToolDefinition) -> GateVerdict {
        let verdict = match mode {
            Mode::Plan => GateVerdict::Describe,
            _ if !definition.mutates => GateVerdict::Execute,
            Mode::Auto if !definition.destructive => GateVerdict::Execute,
            Mode::Auto => GateVerdict::Hold {
                reason: format!("'{}' is destructive and needs explicit confirmation", definition.name),
            },
            Mode::Demander => GateVerdict::Hold {
                reason: format!("'{}' changes data and needs explicit confirmation", definition.name),
            },
        };
        debug!(mode = %mode, tool = %definition.name, verdict = ?verdict, "gate decision");
        verdict
    }

    fn issue(
        &self,
        call: &ValidatedCall,
        mut attested_refs: Vec<KnownEntity>,
    ) -> RelaisResult<PendingConfirmation> {
        attested_refs.sort();
        attested_refs.dedup();

        let token = self.signer.issue(Binding {
            name: &call.name,
            arguments: &call.arguments,
            attested_refs: &attested_refs,
        });

        info!(tool = %call.name, tool_call_id = %call.id, token = %token, "confirmation token issued");

        Ok(PendingConfirmation {
            tool_call_id: token,
            name: call.name.clone(),
            arguments: call.arguments.clone(),
            attested_refs,
        })
    }

    fn redeem(
        &self,
        confirmed_tool_call_id: Option<&str>,
        pending: Option<&PendingConfirmation>,
    ) -> RelaisResult<ToolCall> {
        let pending = pending.ok_or_else(|| mismatch("pendingAction is missing"))?;
        let confirmed = confirmed_tool_call_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| mismatch("confirmedToolCallId is missing"))?;

        if confirmed != pending.tool_call_id {
            warn!(tool = %pending.name, "confirmedToolCallId does not match the pending action");
            return Err(mismatch("confirmedToolCallId does not match the pending action"));
        }

        let binding = Binding {
            name: &pending.name,
            arguments: &pending.arguments,
            attested_refs: &pending.attested_refs,
        };
        if let Err(err) = self.signer.verify(confirmed, binding) {
            warn!(tool = %pending.name, error = %err, "confirmation token rejected");
            return Err(err);
        }

        if self.consumed.is_consumed(confirmed) {
            warn!(tool = %pending.name, "confirmation token replayed");
            return Err(mismatch("confirmation token was already used"));
        }

        Ok(ToolCall {
            id: confirmed.to_string(),
            name: pending.name.clone(),
            arguments: pending.arguments.clone(),
        })
    }

    fn consume(&self, token: &str) -> RelaisResult<()> {
        let parsed = ParsedToken::parse(token)?;
        if self.consumed.mark_consumed(token, self.signer.expires_at(&parsed)) {
            Ok(())
        } else {
            Err(mismatch("confirmation token was already used"))
        }
    }
}
