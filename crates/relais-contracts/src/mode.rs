//! Operating modes, gate verdicts, and the confirmation handshake types.
//!
//! The mode is chosen by the caller on every request. The gate turns
//! (mode, tool definition, confirmation state) into a [`GateVerdict`]; only
//! `Execute` lets a call reach the dispatcher.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::known::KnownEntity;

/// Per-request execution policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Calls are described but never executed.
    Plan,
    /// Validated, safe, non-destructive calls run immediately.
    Auto,
    /// Every mutating call waits for explicit user confirmation.
    #[default]
    #[serde(alias = "ask")]
    Demander,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Plan => "plan",
            Mode::Auto => "auto",
            Mode::Demander => "demander",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The decision the gate emits for a single validated, safety-checked call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GateVerdict {
    /// Run the call now.
    Execute,
    /// Return the call to the caller as a pending confirmation.
    Hold { reason: String },
    /// Plan mode: describe the call without running it.
    Describe,
}

/// A mutating call held for the user's explicit approval.
///
/// The caller resubmits this object as `pendingAction`, together with
/// `confirmedAction: true` and `confirmedToolCallId` equal to `tool_call_id`.
/// The id is a token bound to `name`, `arguments` and `attested_refs`; any
/// change to them invalidates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingConfirmation {
    pub tool_call_id: String,
    pub name: String,
    pub arguments: Value,
    /// Identifiers the safety guard verified when the call was first proposed.
    #[serde(default)]
    pub attested_refs: Vec<KnownEntity>,
}
