//! Per-turn cancellation registry. One `CancelToken` per in-flight
//! `(user_id, session_id)` turn; the Conversation Orchestrator checks it at
//! await points rather than aborting a request mid-flight.

use std::collections::HashMap;

use cce_domain::cancel::CancelToken;
use parking_lot::Mutex;

fn key(user_id: &str, session_id: &str) -> String {
    format!("{user_id}:{session_id}")
}

#[derive(Default)]
pub struct CancelMap {
    tokens: Mutex<HashMap<String, CancelToken>>,
}

impl CancelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fresh token for this turn, replacing any stale entry left
    /// behind by a turn that never cleaned up after itself.
    pub fn register(&self, user_id: &str, session_id: &str) -> CancelToken {
        let token = CancelToken::new();
        self.tokens.lock().insert(key(user_id, session_id), token.clone());
        token
    }

    pub fn remove(&self, user_id: &str, session_id: &str) {
        self.tokens.lock().remove(&key(user_id, session_id));
    }

    /// Signals cancellation for an in-flight turn. Returns `false` if no
    /// turn is currently registered for this key.
    pub fn cancel(&self, user_id: &str, session_id: &str) -> bool {
        match self.tokens.lock().get(&key(user_id, session_id)) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn active_count(&self) -> usize {
        self.tokens.lock().len()
    }
}
