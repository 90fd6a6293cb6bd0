//! Single-flight coordination for session refresh.
//!
//! ARCHITECTURE
//! ============
//! The first request that needs a refresh becomes the leader and receives a
//! [`RefreshGuard`]. Requests that need a refresh while the leader is still
//! running become waiters and receive a oneshot receiver. When the leader
//! settles, waiters are woken in enqueue order with the single new token, or
//! all dropped together on failure.
//!
//! The guard resets the in-flight flag on drop. A leader whose future is
//! cancelled or panics therefore releases the flag and rejects its waiters
//! the same way an explicit failure does.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use tokio::sync::oneshot;

#[derive(Default)]
pub(crate) struct RefreshCoordinator {
    state: Mutex<RefreshState>,
}

#[derive(Default)]
struct RefreshState {
    in_flight: bool,
    waiters: VecDeque<oneshot::Sender<String>>,
}

/// Role handed out by [`RefreshCoordinator::acquire`].
pub(crate) enum Ticket<'a> {
    /// Caller must run the refresh and settle the guard.
    Leader(RefreshGuard<'a>),
    /// Caller waits for the leader's token. A receive error means the
    /// refresh failed.
    Waiter(oneshot::Receiver<String>),
}

impl RefreshCoordinator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn acquire(&self) -> Ticket<'_> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.in_flight {
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            tracing::debug!(queued = state.waiters.len(), "refresh in flight; request queued");
            return Ticket::Waiter(rx);
        }

        state.in_flight = true;
        Ticket::Leader(RefreshGuard { coordinator: self, settled: false })
    }

    pub(crate) fn is_refreshing(&self) -> bool {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).in_flight
    }

    pub(crate) fn queued(&self) -> usize {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).waiters.len()
    }

    fn finish(&self) -> VecDeque<oneshot::Sender<String>> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.in_flight = false;
        std::mem::take(&mut state.waiters)
    }
}

pub(crate) struct RefreshGuard<'a> {
    coordinator: &'a RefreshCoordinator,
    settled: bool,
}

impl RefreshGuard<'_> {
    /// Release the flag and hand `token` to every waiter, oldest first.
    pub(crate) fn succeed(mut self, token: &str) {
        self.settled = true;
        let waiters = self.coordinator.finish();
        tracing::debug!(waiters = waiters.len(), "refresh succeeded; replaying queued requests");
        for waiter in waiters {
            // A waiter whose caller went away is skipped.
            let _ = waiter.send(token.to_owned());
        }
    }

    /// Release the flag and reject every waiter.
    pub(crate) fn fail(mut self) {
        self.settled = true;
        let waiters = self.coordinator.finish();
        tracing::debug!(waiters = waiters.len(), "refresh failed; rejecting queued requests");
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let waiters = self.coordinator.finish();
        tracing::warn!(waiters = waiters.len(), "refresh abandoned before settling; rejecting queued requests");
    }
}

#[cfg(test)]
#[path = "refresh_test.rs"]
mod tests;
