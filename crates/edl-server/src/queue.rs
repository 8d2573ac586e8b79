//! Bounded dispatch queue.
//!
//! Mutations are dispatched in strict global arrival order. A read may
//! overtake earlier entries only when nothing earlier (or in flight) that
//! conflicts with its scope is still outstanding.

use std::collections::VecDeque;

use edl_protocol::{ConnectionId, EditorError};
use parking_lot::Mutex;

use crate::request::{PendingRequest, RequestKey, ScopeClaim};

#[derive(Debug, Default)]
struct QueueState {
    entries: VecDeque<PendingRequest>,
    next_seq: u64,
}

/// Multi-producer, single-consumer queue shared by connection tasks and the
/// editor executor.
#[derive(Debug)]
pub struct DispatchQueue {
    capacity: usize,
    state: Mutex<QueueState>,
}

impl DispatchQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(QueueState::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Admit a request, assigning its arrival sequence number.
    ///
    /// A full queue rejects with `Busy`; nothing is admitted.
    pub fn enqueue(&self, mut request: PendingRequest) -> Result<u64, EditorError> {
        let mut state = self.state.lock();
        if state.entries.len() >= self.capacity {
            return Err(EditorError::busy(state.entries.len()));
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        request.seq = seq;
        state.entries.push_back(request);
        Ok(seq)
    }

    /// Remove and return the oldest entry that is allowed to start now.
    ///
    /// `in_flight` lists the claims of requests that have started but not
    /// yet completed (multi-tick continuations).
    pub fn dequeue_next_ready(&self, in_flight: &[ScopeClaim]) -> Option<PendingRequest> {
        let mut state = self.state.lock();
        let index = Self::first_ready(&state.entries, in_flight)?;
        state.entries.remove(index)
    }

    fn first_ready(entries: &VecDeque<PendingRequest>, in_flight: &[ScopeClaim]) -> Option<usize> {
        let mut earlier_mutation = false;
        for (index, entry) in entries.iter().enumerate() {
            let claim = &entry.claim;
            let blocked = (claim.mutating && earlier_mutation)
                || entries.iter().take(index).any(|e| e.claim.conflicts_with(claim))
                || in_flight.iter().any(|c| c.conflicts_with(claim));
            if !blocked {
                return Some(index);
            }
            earlier_mutation |= claim.mutating;
        }
        None
    }

    /// Drop every queued entry for a connection. Returns how many were removed.
    pub fn remove_connection(&self, connection: ConnectionId) -> usize {
        let mut state = self.state.lock();
        let before = state.entries.len();
        state.entries.retain(|e| e.key.connection != connection);
        before - state.entries.len()
    }

    pub fn remove(&self, key: &RequestKey) -> Option<PendingRequest> {
        let mut state = self.state.lock();
        let index = state.entries.iter().position(|e| &e.key == key)?;
        state.entries.remove(index)
    }

    /// Empty the queue, returning entries in arrival order.
    pub fn drain_all(&self) -> Vec<PendingRequest> {
        self.state.lock().entries.drain(..).collect()
    }
}
