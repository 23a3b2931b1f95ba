//! Cooperative cancellation: shared abort tokens per execution.
//!
//! Each execution is registered with an abort token at submission. A
//! cancel request sets the token; the transfer loop checks it at chunk
//! boundaries and the retry timer checks it before re-queueing, so the
//! worst-case cancellation latency is one chunk's I/O time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use crate::execution::ExecutionId;

/// Registry of execution id -> abort token.
#[derive(Debug, Default)]
pub struct CancelRegistry {
    tokens: RwLock<HashMap<ExecutionId, Arc<AtomicBool>>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an execution; returns the token the worker polls.
    pub fn register(&self, id: ExecutionId) -> Arc<AtomicBool> {
        let token = Arc::new(AtomicBool::new(false));
        self.tokens.write().unwrap().insert(id, Arc::clone(&token));
        token
    }

    /// Drop the token once the execution is terminal.
    pub fn unregister(&self, id: ExecutionId) {
        self.tokens.write().unwrap().remove(&id);
    }

    /// Request cancellation. Returns false if the execution is unknown or
    /// already terminal (token removed).
    pub fn request_cancel(&self, id: ExecutionId) -> bool {
        match self.tokens.read().unwrap().get(&id) {
            Some(token) => {
                token.store(true, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }
}
