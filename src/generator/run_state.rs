//! Single-flight lock for generation-type operations.
//!
//! At most one run (generation or enrichment) is in flight per
//! [`CourseGenerator`](super::CourseGenerator). The state token only moves
//! through [`RunLock::acquire`], [`RunLock::cancel`] and the drop of the
//! returned [`RunGuard`].

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::types::RunKind;

/// State of the single-flight lock
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    /// Nothing in flight
    Idle,
    /// A run is in flight
    Running {
        /// Generation or enrichment
        kind: RunKind,
        /// Topic being processed
        topic: String,
    },
    /// Cancellation was requested; the run stops at its next checkpoint
    Cancelling {
        /// Generation or enrichment
        kind: RunKind,
        /// Topic being processed
        topic: String,
    },
}

impl RunState {
    /// Whether no run is in flight
    pub fn is_idle(&self) -> bool {
        matches!(self, RunState::Idle)
    }
}

struct Slot {
    state: RunState,
    cancel: Option<CancellationToken>,
}

#[derive(Clone)]
pub(crate) struct RunLock {
    slot: Arc<Mutex<Slot>>,
}

impl RunLock {
    pub(crate) fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(Slot {
                state: RunState::Idle,
                cancel: None,
            })),
        }
    }

    /// Take the lock or fail with [`Error::AlreadyRunning`]; never waits
    pub(crate) fn acquire(&self, kind: RunKind, topic: &str) -> Result<RunGuard> {
        let mut slot = self.lock();
        if !slot.state.is_idle() {
            return Err(Error::AlreadyRunning);
        }

        let token = CancellationToken::new();
        slot.state = RunState::Running {
            kind,
            topic: topic.to_string(),
        };
        slot.cancel = Some(token.clone());

        Ok(RunGuard {
            slot: self.slot.clone(),
            token,
        })
    }

    /// Request cancellation of the in-flight run; false when idle
    pub(crate) fn cancel(&self) -> bool {
        let mut slot = self.lock();
        let next = match &slot.state {
            RunState::Idle => return false,
            RunState::Running { kind, topic } => RunState::Cancelling {
                kind: *kind,
                topic: topic.clone(),
            },
            // already requested
            RunState::Cancelling { .. } => return true,
        };
        slot.state = next;
        if let Some(token) = &slot.cancel {
            token.cancel();
        }
        true
    }

    pub(crate) fn current(&self) -> RunState {
        self.lock().state.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        // The slot is only ever assigned whole values, so a poisoned lock still holds a valid state.
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Ownership of the single-flight lock; releases it on drop
pub(crate) struct RunGuard {
    slot: Arc<Mutex<Slot>>,
    token: CancellationToken,
}

impl RunGuard {
    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        slot.state = RunState::Idle;
        slot.cancel = None;
    }
}
