//! Outstanding-request table.
//!
//! Ids are generated fresh per call and never reused within a registry, and
//! at most one request of each [`RequestKind`] may be in flight at a time.

use std::collections::HashMap;

use crate::error::{RelayError, Result};
use crate::protocol::RequestKind;

/// Maps in-flight correlation ids to the kind of request that produced them.
#[derive(Debug)]
pub struct RequestRegistry {
    next_id: u64,
    pending: HashMap<u64, RequestKind>,
}

impl Default for RequestRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            pending: HashMap::new(),
        }
    }

    /// Reserve a fresh id for `kind`.
    ///
    /// Fails with [`RelayError::DuplicateInFlight`] if a request of the same
    /// kind has not been answered yet.
    pub fn register(&mut self, kind: RequestKind) -> Result<u64> {
        if self.is_in_flight(kind) {
            return Err(RelayError::DuplicateInFlight(kind));
        }
        let id = self.next_id;
        self.next_id += 1;
        self.pending.insert(id, kind);
        Ok(id)
    }

    /// Look up the kind behind `id` without releasing it.
    pub fn resolve(&self, id: u64) -> Result<RequestKind> {
        self.pending
            .get(&id)
            .copied()
            .ok_or(RelayError::UnknownRequestId(id))
    }

    /// Drop `id` from the table, returning its kind if it was present.
    pub fn release(&mut self, id: u64) -> Option<RequestKind> {
        self.pending.remove(&id)
    }

    /// Resolve and release in one step; the usual path for a reply.
    pub fn complete(&mut self, id: u64) -> Result<RequestKind> {
        self.release(id).ok_or(RelayError::UnknownRequestId(id))
    }

    pub fn is_in_flight(&self, kind: RequestKind) -> bool {
        self.pending.values().any(|k| *k == kind)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Forget every outstanding request (channel closed).
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
