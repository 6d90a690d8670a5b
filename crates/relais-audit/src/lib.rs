//! # relais-audit
//!
//! Append-only, SHA-256 hash-chained decision journal for the relais runtime.
//!
//! ## Overview
//!
//! Every tool-call decision the orchestrator makes is wrapped in a
//! `JournalEntry` that commits to the previous entry's hash. Editing any
//! entry breaks the chain, which `verify_chain` detects. The response
//! envelope carries the entry count and the terminal hash as a compact
//! commitment to the whole journal.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use relais_audit::InMemoryJournal;
//! use relais_core::traits::AuditWriter;
//!
//! let journal = InMemoryJournal::new(request_id.to_string());
//! let envelope = orchestrator.handle(&request_id, request, &journal, None).await;
//! assert!(journal.verify_integrity());
//! ```

pub mod chain;
pub mod entry;
pub mod memory;

pub use chain::{hash_entry, verify_chain};
pub use entry::{JournalEntry, SealedJournal, GENESIS_HASH};
pub use memory::InMemoryJournal;

// ── Tests ─────────────────────────────────────────────────────────────────────
