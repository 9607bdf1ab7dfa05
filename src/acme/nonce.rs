//! Anti-replay nonce pool.
//!
//! The pool is purely in-memory: its lock guards a stack of tokens and is
//! never held across a network call. Fetching a fresh nonce when the pool is
//! empty is the client's job ([`super::client::AcmeClient`]), so concurrent
//! signers contend only on the brief push/pop and never on network latency.

use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct NoncePool {
    stack: Mutex<Vec<String>>,
}

impl NoncePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns the most recently pushed nonce. No network access.
    pub fn pop(&self) -> Option<String> {
        self.lock().pop()
    }

    /// Adds a nonce harvested from a response. Every response, success or
    /// failure, carries a fresh `Replay-Nonce`, so supply is replenished
    /// continuously.
    pub fn push(&self, token: String) {
        if token.is_empty() {
            return;
        }
        self.lock().push(token);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<String>> {
        // A poisoned lock cannot corrupt a Vec of strings; keep serving.
        self.stack.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
