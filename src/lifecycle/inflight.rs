//! Suppresses a second submission of the same request while the first is still running.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Set of request keys currently being processed.
#[derive(Clone, Default)]
pub struct InFlightGate {
    keys: Arc<Mutex<HashSet<String>>>,
}

/// Held while a request runs; releases its key on drop.
pub struct InFlightPermit {
    keys: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl InFlightGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key`, or `None` when another request holds it.
    pub fn try_enter(&self, key: impl Into<String>) -> Option<InFlightPermit> {
        let key = key.into();
        let mut keys = self.keys.lock().unwrap_or_else(|e| e.into_inner());
        if !keys.insert(key.clone()) {
            return None;
        }
        Some(InFlightPermit {
            keys: Arc::clone(&self.keys),
            key,
        })
    }
}

impl Drop for InFlightPermit {
    fn drop(&mut self) {
        let mut keys = self.keys.lock().unwrap_or_else(|e| e.into_inner());
        keys.remove(&self.key);
    }
}
