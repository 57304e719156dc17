//! Single-flight access token refresh.
//!
//! The first request that needs a new token becomes the leader and performs
//! the refresh; every other request parks on a bounded wait-list and receives
//! the leader's outcome. The wait-list is drained in one step when the leader
//! settles, including when the leader is dropped mid-refresh.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{GatewayError, GatewayResult};

pub type RefreshOutcome = GatewayResult<String>;

#[derive(Debug, Default)]
struct RefreshState {
    in_flight: bool,
    waiters: Vec<oneshot::Sender<RefreshOutcome>>,
    /// Last rotation performed: (token that was replaced, its replacement).
    last_rotation: Option<(Option<String>, String)>,
}

#[derive(Debug, Clone)]
pub struct RefreshCoordinator {
    state: Arc<Mutex<RefreshState>>,
    capacity: usize,
}

#[derive(Debug)]
pub enum RefreshTicket {
    /// Perform the refresh and settle the lease.
    Lead(RefreshLease),
    /// Another request is refreshing; await its outcome.
    Wait(oneshot::Receiver<RefreshOutcome>),
    /// The token that was rejected has already been rotated.
    Replay(String),
}

impl RefreshCoordinator {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(RefreshState::default())),
            capacity: capacity.max(1),
        }
    }

    /// Register interest in a fresh token after `rejected` was refused.
    pub fn enter(&self, rejected: Option<&str>) -> GatewayResult<RefreshTicket> {
        let mut state = lock(&self.state);

        if state.in_flight {
            if state.waiters.len() >= self.capacity {
                return Err(GatewayError::RefreshQueueFull);
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push(tx);
            debug!(waiting = state.waiters.len(), "queued behind in-flight token refresh");
            return Ok(RefreshTicket::Wait(rx));
        }

        if let Some((replaced, replacement)) = &state.last_rotation {
            if replaced.as_deref() == rejected {
                return Ok(RefreshTicket::Replay(replacement.clone()));
            }
        }

        state.in_flight = true;
        Ok(RefreshTicket::Lead(RefreshLease {
            state: Arc::clone(&self.state),
            rejected: rejected.map(str::to_owned),
            settled: false,
        }))
    }

    pub fn waiting(&self) -> usize {
        lock(&self.state).waiters.len()
    }

    pub fn in_flight(&self) -> bool {
        lock(&self.state).in_flight
    }
}

/// Held by the request performing the refresh.
#[derive(Debug)]
pub struct RefreshLease {
    state: Arc<Mutex<RefreshState>>,
    rejected: Option<String>,
    settled: bool,
}

impl RefreshLease {
    /// Publish the outcome to every waiter and reopen the coordinator.
    pub fn complete(mut self, outcome: &RefreshOutcome) {
        self.settle(outcome.clone());
    }

    fn settle(&mut self, outcome: RefreshOutcome) {
        self.settled = true;
        let waiters = {
            let mut state = lock(&self.state);
            state.in_flight = false;
            if let Ok(token) = &outcome {
                state.last_rotation = Some((self.rejected.take(), token.clone()));
            }
            std::mem::take(&mut state.waiters)
        };

        debug!(
            waiters = waiters.len(),
            success = outcome.is_ok(),
            "token refresh settled"
        );
        for waiter in waiters {
            // receiver gone means that request was cancelled
            let _ = waiter.send(outcome.clone());
        }
    }
}

impl Drop for RefreshLease {
    fn drop(&mut self) {
        if !self.settled {
            self.settle(Err(GatewayError::RefreshCancelled));
        }
    }
}

fn lock(state: &Mutex<RefreshState>) -> MutexGuard<'_, RefreshState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
