//! Per-session orchestration state and the report handed back to callers.

use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use crate::sync::finalize::FinalizeOutcome;
use crate::sync::progress::{EchoSink, ProgressBoard};
use crate::sync::rota::{Rota, RotaTotals};

/// Lifecycle of one sync session. There is no retry transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Planned,
    Executing,
    Finalizing,
    Succeeded,
    Failed,
}

impl SessionState {
    pub fn can_enter(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Planned, Executing)
                | (Executing, Failed)
                | (Executing, Finalizing)
                // Dry runs never finalize
                | (Executing, Succeeded)
                | (Finalizing, Succeeded)
                | (Finalizing, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Succeeded | SessionState::Failed)
    }
}

/// Ephemeral state for one execution of a rota.
#[derive(Debug)]
pub struct SyncSession {
    pub totals: RotaTotals,
    pub progress: ProgressBoard,
    state: SessionState,
}

impl SyncSession {
    pub fn new(rota: &Rota) -> Self {
        let totals = rota.totals();
        Self {
            totals,
            progress: ProgressBoard::new(rota.workers.len(), totals.bytes, totals.items),
            state: SessionState::Planned,
        }
    }

    pub fn with_echo_sink(mut self, sink: EchoSink) -> Self {
        self.progress = self.progress.with_echo_sink(sink);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn enter(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_enter(next),
            "invalid session transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!("session {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}

/// A worker task that stopped on a fatal error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerFailure {
    pub worker: usize,
    pub error: String,
}

/// Outcome of [`ParallelExecutor::execute`](crate::sync::ParallelExecutor::execute).
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub state: SessionState,
    pub dry_run: bool,
    pub totals: RotaTotals,
    pub done_items: usize,
    pub done_bytes: u64,
    pub failures: Vec<WorkerFailure>,
    /// Session-level error that prevented the workers from running.
    pub error: Option<String>,
    /// Present only when the finalization pass ran.
    pub finalize: Option<FinalizeOutcome>,
    pub duration: Duration,
}

impl SyncReport {
    pub fn succeeded(&self) -> bool {
        self.state == SessionState::Succeeded
    }
}
