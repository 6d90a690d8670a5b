//! In-memory decision journal.
//!
//! One `InMemoryJournal` is created per request. The orchestrator writes a
//! record for every proposed call and finalizes it when the response is
//! assembled; after that the journal is sealed and refuses further writes.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{debug, info};

use relais_contracts::{
    error::{RelaisError, RelaisResult},
    execution::{DecisionRecord, JournalSummary},
};
use relais_core::traits::AuditWriter;

use crate::{
    chain::{first_broken_link, hash_entry},
    entry::{JournalEntry, SealedJournal, GENESIS_HASH},
};

// ── Internal mutable state ────────────────────────────────────────────────────

pub(crate) struct JournalState {
    pub(crate) entries: Vec<JournalEntry>,
    /// Hash of the last entry, or `GENESIS_HASH` before the first write.
    pub(crate) last_hash: String,
    pub(crate) sealed: bool,
}

// ── Public writer ─────────────────────────────────────────────────────────────

/// Append-only, SHA-256 chained journal held in memory.
///
/// Clones share the same chain, so a handle kept by the caller can export
/// what the orchestrator wrote.
#[derive(Clone)]
pub struct InMemoryJournal {
    request_id: String,
    pub(crate) state: Arc<Mutex<JournalState>>,
}

impl InMemoryJournal {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            state: Arc::new(Mutex::new(JournalState {
                entries: Vec::new(),
                last_hash: GENESIS_HASH.to_string(),
                sealed: false,
            })),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Snapshot of everything written so far.
    pub fn export(&self) -> SealedJournal {
        let state = self.state.lock().expect("journal lock poisoned");
        SealedJournal {
            request_id: self.request_id.clone(),
            entries: state.entries.clone(),
            sealed_at: Utc::now(),
            terminal_hash: state.last_hash.clone(),
        }
    }

    pub fn verify_integrity(&self) -> bool {
        let state = self.state.lock().expect("journal lock poisoned");
        first_broken_link(&state.entries).is_none()
    }

    fn lock(&self) -> RelaisResult<std::sync::MutexGuard<'_, JournalState>> {
        self.state.lock().map_err(|e| RelaisError::Internal {
            reason: format!("journal lock poisoned: {e}"),
        })
    }
}

// ── AuditWriter impl ──────────────────────────────────────────────────────────

impl AuditWriter for InMemoryJournal {
    fn write(&self, record: &DecisionRecord) -> RelaisResult<()> {
        let mut state = self.lock()?;
        if state.sealed {
            return Err(RelaisError::Internal {
                reason: format!("journal for request {} is already sealed", self.request_id),
            });
        }

        let sequence = state.entries.len() as u64;
        let prev_hash = state.last_hash.clone();
        let hash = hash_entry(&self.request_id, sequence, &prev_hash, record);

        debug!(
            request_id = %self.request_id,
            sequence,
            tool_call_id = %record.tool_call_id,
            decision = ?record.decision,
            "decision recorded"
        );

        state.entries.push(JournalEntry {
            sequence,
            request_id: self.request_id.clone(),
            record: record.clone(),
            prev_hash,
            hash: hash.clone(),
        });
        state.last_hash = hash;
        Ok(())
    }

    /// Seal the journal. Finalizing twice returns the same summary.
    fn finalize(&self, request_id: &str) -> RelaisResult<JournalSummary> {
        let mut state = self.lock()?;
        let summary = JournalSummary {
            entries: state.entries.len() as u64,
            terminal_hash: state.last_hash.clone(),
        };

        if !state.sealed {
            state.sealed = true;
            info!(
                request_id = %request_id,
                entries = summary.entries,
                terminal_hash = %summary.terminal_hash,
                "decision journal finalized"
            );
        }
        Ok(summary)
    }
}
