//! # State Module
//!
//! The engine lifecycle state machine plus the in-flight accounting that
//! drives completion detection.
//!
//! ## Quiescence
//!
//! The crawl is done when the scheduler is empty and no worker holds a unit
//! of work. Workers increment the in-flight counter when they take a request
//! and decrement it after any child requests have been enqueued, so the
//! combination "queue empty and in-flight zero" can never be observed while
//! undiscovered work still exists. Every enqueue and every worker completion
//! pings a [`Notify`] so the dispatch loop and `wait_for_completion` wake
//! without polling.

use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{watch, Notify};
use tracing::debug;

use crate::error::CrawlError;

/// Lifecycle states of the engine.
///
/// Valid transitions: Idle → Starting → Running ⇄ Paused → Stopping →
/// Stopped, with Error reachable from Starting and Running. A stop may
/// also interrupt Starting directly. `start` is accepted from Idle or
/// Stopped only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum EngineState {
    Idle,
    Starting,
    Running,
    Paused,
    Stopping,
    Stopped,
    Error,
}

impl EngineState {
    /// Whether the machine may move from `self` to `next`.
    pub fn can_transition_to(self, next: EngineState) -> bool {
        use EngineState::*;
        matches!(
            (self, next),
            (Idle, Starting)
                | (Stopped, Starting)
                | (Starting, Running)
                | (Starting, Stopping)
                | (Starting, Error)
                | (Running, Paused)
                | (Paused, Running)
                | (Running, Stopping)
                | (Paused, Stopping)
                | (Running, Error)
                | (Stopping, Stopped)
                | (Error, Starting)
        )
    }

    /// Whether the crawl has reached a resting state.
    pub fn is_terminal(self) -> bool {
        matches!(self, EngineState::Stopped | EngineState::Error)
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EngineState::Idle => "idle",
            EngineState::Starting => "starting",
            EngineState::Running => "running",
            EngineState::Paused => "paused",
            EngineState::Stopping => "stopping",
            EngineState::Stopped => "stopped",
            EngineState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Shared lifecycle handle: the state channel, the in-flight counter, and
/// the work-signal used for completion detection.
pub struct EngineStateHandle {
    state: watch::Sender<EngineState>,
    in_flight: AtomicUsize,
    work_signal: Notify,
}

impl EngineStateHandle {
    pub fn new() -> Self {
        let (state, _) = watch::channel(EngineState::Idle);
        EngineStateHandle {
            state,
            in_flight: AtomicUsize::new(0),
            work_signal: Notify::new(),
        }
    }

    pub fn current(&self) -> EngineState {
        *self.state.borrow()
    }

    /// Moves to `next`, rejecting transitions the state machine forbids.
    pub fn transition_to(&self, next: EngineState) -> Result<(), CrawlError> {
        let mut result = Ok(());
        self.state.send_modify(|current| {
            if current.can_transition_to(next) {
                debug!("engine state {} -> {}", current, next);
                *current = next;
            } else {
                result = Err(CrawlError::InvalidState(format!(
                    "cannot transition from {} to {}",
                    current, next
                )));
            }
        });
        if result.is_ok() {
            // State changes can unblock waiters (pause/resume, stop).
            self.work_signal.notify_waiters();
        }
        result
    }

    /// A receiver observing every state change.
    pub fn subscribe(&self) -> watch::Receiver<EngineState> {
        self.state.subscribe()
    }

    /// Called by a worker the moment it takes a request off the queue.
    pub fn worker_started(&self) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
    }

    /// Called after a worker has finished, including enqueueing any child
    /// requests. Ordering matters: children must be visible in the scheduler
    /// before the counter drops, or quiescence could be observed spuriously.
    pub fn worker_finished(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.work_signal.notify_waiters();
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Signals that new work arrived or conditions changed.
    pub fn signal_work(&self) {
        self.work_signal.notify_waiters();
    }

    /// Waits until the next work signal.
    pub async fn wait_for_signal(&self) {
        self.work_signal.notified().await;
    }
}

impl Default for EngineStateHandle {
    fn default() -> Self {
        Self::new()
    }
}
