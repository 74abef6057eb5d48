// ABOUTME: Per-key mutual exclusion gate keyed by item identity
// ABOUTME: Tracks the logical clock of the task currently running for each key

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Outcome of trying to claim a key.
#[derive(Debug)]
pub enum Admission {
    /// The key was free and is now held until the claim is dropped.
    Claimed(KeyClaim),
    /// A logically newer task holds the key; the caller should drop its task.
    Stale { running: i64 },
    /// A logically older (or equal) task holds the key; the caller should retry later.
    Busy { running: i64 },
}

/// Map of running key to the `dateMS` of the task holding it.
///
/// Each engine owns two independent gates, one for mutation tasks and one for
/// validator tasks.
#[derive(Debug, Clone, Default)]
pub struct KeyGate {
    running: Arc<Mutex<HashMap<String, i64>>>,
}

impl KeyGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, i64>> {
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Check-and-claim in one critical section.
    pub fn try_claim(&self, key: &str, date_ms: i64) -> Admission {
        let mut running = self.lock();
        if let Some(&current) = running.get(key) {
            if current > date_ms {
                return Admission::Stale { running: current };
            }
            return Admission::Busy { running: current };
        }
        running.insert(key.to_string(), date_ms);
        Admission::Claimed(KeyClaim {
            gate: self.clone(),
            key: key.to_string(),
        })
    }

    /// Clock of the task currently holding `key`.
    pub fn running(&self, key: &str) -> Option<i64> {
        self.lock().get(key).copied()
    }

    /// Number of keys currently held.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Releases its key when dropped, whether the task succeeded, failed or panicked.
#[derive(Debug)]
pub struct KeyClaim {
    gate: KeyGate,
    key: String,
}

impl KeyClaim {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for KeyClaim {
    fn drop(&mut self) {
        self.gate.lock().remove(&self.key);
    }
}
