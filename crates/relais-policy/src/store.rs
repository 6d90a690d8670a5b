//! In-memory record of spent confirmation tokens.
//!
//! Entries only need to outlive the token itself: once a token is past its
//! TTL the signature check rejects it anyway. Expired entries are swept on
//! every insert and the store never holds more than `capacity` entries,
//! evicting the oldest first.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tracing::debug;

use relais_core::traits::ConsumedTokenStore;

#[derive(Debug, Default)]
struct StoreState {
    expiry: HashMap<String, DateTime<Utc>>,
    /// Insertion order, oldest first.
    order: VecDeque<String>,
}

#[derive(Debug)]
pub struct InMemoryConsumedTokens {
    state: Mutex<StoreState>,
    capacity: usize,
}

impl InMemoryConsumedTokens {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().expect("token store lock poisoned").expiry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn mark_at(&self, token: &str, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let mut state = self.state.lock().expect("token store lock poisoned");

        // Sweep.
        let before = state.expiry.len();
        state.expiry.retain(|_, expires| *expires > now);
        if state.expiry.len() != before {
            let StoreState { expiry, order } = &mut *state;
            order.retain(|token| expiry.contains_key(token));
            debug!(swept = before - expiry.len(), "expired confirmation tokens swept");
        }

        if state.expiry.contains_key(token) {
            return false;
        }

        state.expiry.insert(token.to_string(), expires_at);
        state.order.push_back(token.to_string());

        while state.order.len() > self.capacity {
            if let Some(oldest) = state.order.pop_front() {
                state.expiry.remove(&oldest);
                debug!(capacity = self.capacity, "token store full, evicted oldest entry");
            }
        }
        true
    }
}

impl ConsumedTokenStore for InMemoryConsumedTokens {
    fn mark_consumed(&self, token: &str, expires_at: DateTime<Utc>) -> bool {
        self.mark_at(token, expires_at, Utc::now())
    }

    fn is_consumed(&self, token: &str) -> bool {
        self.state
            .lock()
            .expect("token store lock poisoned")
            .expiry
            .contains_key(token)
    }
}
