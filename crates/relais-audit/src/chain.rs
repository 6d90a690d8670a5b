//! Hash-chain primitives.
//!
//! Hash input, in order:
//!   1. request_id, length-prefixed (u64 big-endian) UTF-8
//!   2. sequence as u64 big-endian
//!   3. prev_hash as 64 ASCII hex chars
//!   4. JSON of the record

use sha2::{Digest, Sha256};

use relais_contracts::execution::DecisionRecord;

use crate::entry::{JournalEntry, GENESIS_HASH};

/// SHA-256 of one entry's content, as lowercase hex.
///
/// # Panics
///
/// Panics if `record` cannot be serialized, which a `DecisionRecord` always can.
pub fn hash_entry(request_id: &str, sequence: u64, prev_hash: &str, record: &DecisionRecord) -> String {
    let record_json =
        serde_json::to_vec(record).expect("DecisionRecord is always serializable");

    let mut hasher = Sha256::new();
    hasher.update((request_id.len() as u64).to_be_bytes());
    hasher.update(request_id.as_bytes());
    hasher.update(sequence.to_be_bytes());
    hasher.update(prev_hash.as_bytes());
    hasher.update(&record_json);

    hex::encode(hasher.finalize())
}

/// Check linkage, sequence numbering and every hash.
///
/// Returns the sequence of the first bad entry, or `None` when the chain is
/// intact. An empty chain is intact.
pub fn first_broken_link(entries: &[JournalEntry]) -> Option<u64> {
    let mut expected_prev = GENESIS_HASH;

    for (position, entry) in entries.iter().enumerate() {
        let recomputed = hash_entry(&entry.request_id, entry.sequence, &entry.prev_hash, &entry.record);
        if entry.sequence != position as u64 || entry.prev_hash != expected_prev || entry.hash != recomputed {
            return Some(position as u64);
        }
        expected_prev = entry.hash.as_str();
    }

    None
}

pub fn verify_chain(entries: &[JournalEntry]) -> bool {
    first_broken_link(entries).is_none()
}
