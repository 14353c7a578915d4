//! Round-robin endpoint selection policy

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::EndpointSelector;
use crate::error::{RelayError, Result};
use crate::models::Endpoint;

/// Selects endpoints in strict cyclic order
///
/// The cursor always holds a value in `[0, pool size)` and is advanced with a
/// single atomic read-modify-write, so concurrent callers never observe the
/// same position within one cycle.
pub struct RoundRobinSelector {
    endpoints: RwLock<Vec<Arc<Endpoint>>>,
    cursor: AtomicUsize,
}

impl RoundRobinSelector {
    pub fn new() -> Self {
        Self {
            endpoints: RwLock::new(Vec::new()),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Advance the cursor and return its previous position
    fn next_index(&self, len: usize) -> usize {
        let previous = self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| Some((c + 1) % len))
            .unwrap_or_else(|c| c);
        previous % len
    }
}

impl Default for RoundRobinSelector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EndpointSelector for RoundRobinSelector {
    async fn select(&self) -> Result<Arc<Endpoint>> {
        let endpoints = self.endpoints.read();

        if endpoints.is_empty() {
            return Err(RelayError::NoEndpointsAvailable);
        }

        let idx = self.next_index(endpoints.len());
        endpoints
            .get(idx)
            .cloned()
            .ok_or(RelayError::NoEndpointsAvailable)
    }

    async fn refresh(&self, endpoints: Vec<Endpoint>) -> Result<()> {
        let mut guard = self.endpoints.write();
        *guard = endpoints.into_iter().map(Arc::new).collect();
        // Held under the write lock so no select sees the new pool with the old cursor
        self.cursor.store(0, Ordering::Release);
        Ok(())
    }

    fn available_count(&self) -> usize {
        self.endpoints.read().len()
    }

    fn policy_name(&self) -> &'static str {
        "roundrobin"
    }
}
