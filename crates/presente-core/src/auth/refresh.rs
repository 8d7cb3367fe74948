//! Single-flight coordination for access-token refresh.
//!
//! The first caller to hit an expired token becomes the leader and performs
//! the refresh; everyone arriving while it runs is queued. The leader takes
//! the queue back, in arrival order, when it finishes. If the leader is
//! dropped before finishing, the queue is dropped with it so queued callers
//! observe a closed channel instead of waiting forever.

use std::sync::{Mutex, MutexGuard};

use tracing::debug;

struct RefreshState<T> {
    in_flight: bool,
    queue: Vec<T>,
}

pub struct RefreshCoordinator<T> {
    state: Mutex<RefreshState<T>>,
}

/// Outcome of `RefreshCoordinator::admit`.
pub enum Admission<'a, T> {
    /// The caller owns the refresh; its item is handed back.
    Lead(RefreshGuard<'a, T>, T),
    /// A refresh is already running; the item was queued behind it.
    Queued,
}

impl<T> RefreshCoordinator<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RefreshState {
                in_flight: false,
                queue: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RefreshState<T>> {
        // No critical section can leave the state half-written
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim the refresh, or queue `item` behind the one in flight.
    pub fn admit(&self, item: T) -> Admission<'_, T> {
        let mut state = self.lock();
        if state.in_flight {
            state.queue.push(item);
            debug!(queued = state.queue.len(), "Refresh in flight, request queued");
            Admission::Queued
        } else {
            state.in_flight = true;
            Admission::Lead(RefreshGuard { owner: self, finished: false }, item)
        }
    }

    pub fn is_refreshing(&self) -> bool {
        self.lock().in_flight
    }

    pub fn queued(&self) -> usize {
        self.lock().queue.len()
    }

    fn release(&self) -> Vec<T> {
        let mut state = self.lock();
        state.in_flight = false;
        std::mem::take(&mut state.queue)
    }
}

impl<T> Default for RefreshCoordinator<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Held by the refresh leader. Finishing returns the queue; dropping it
/// unfinished discards the queue.
pub struct RefreshGuard<'a, T> {
    owner: &'a RefreshCoordinator<T>,
    finished: bool,
}

impl<T> RefreshGuard<'_, T> {
    /// Return to idle and hand back everything queued, oldest first.
    pub fn finish(mut self) -> Vec<T> {
        self.finished = true;
        self.owner.release()
    }
}

impl<T> Drop for RefreshGuard<'_, T> {
    fn drop(&mut self) {
        if !self.finished {
            let abandoned = self.owner.release();
            debug!(abandoned = abandoned.len(), "Refresh leader dropped before finishing");
        }
    }
}
