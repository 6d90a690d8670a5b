//! Journal entry types.
//!
//! A [`JournalEntry`] wraps one `DecisionRecord` with its position in the
//! request's chain and the hashes linking it to its neighbours. A
//! [`SealedJournal`] is what a finalized request leaves behind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use relais_contracts::execution::{DecisionRecord, JournalSummary};

/// `prev_hash` of the first entry of every chain: 64 hex zeros.
pub const GENESIS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// One link in a request's decision chain.
///
/// Changing any field, including inside `record`, invalidates `hash` and
/// every later `prev_hash`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    /// Position in the chain, from 0.
    pub sequence: u64,
    pub request_id: String,
    pub record: DecisionRecord,
    pub prev_hash: String,
    pub hash: String,
}

/// The full, finalized journal for one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SealedJournal {
    pub request_id: String,
    pub entries: Vec<JournalEntry>,
    pub sealed_at: DateTime<Utc>,
    /// Hash of the last entry; `GENESIS_HASH` when nothing was recorded.
    pub terminal_hash: String,
}

impl SealedJournal {
    pub fn summary(&self) -> JournalSummary {
        JournalSummary {
            entries: self.entries.len() as u64,
            terminal_hash: self.terminal_hash.clone(),
        }
    }
}
