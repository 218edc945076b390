//! RunState and the handle that guards it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::resilience::RetryObserver;

/// Where a RunState is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunLifecycle {
    /// Freshly created or reset; a run may begin.
    #[default]
    Fresh,
    /// A run is in progress.
    Running,
    /// The last run ended; `reset()` is required before the next one.
    Finished,
}

impl std::fmt::Display for RunLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fresh => write!(f, "fresh"),
            Self::Running => write!(f, "running"),
            Self::Finished => write!(f, "finished"),
        }
    }
}

/// Mutable state of one pipeline run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunState {
    pub lifecycle: RunLifecycle,
    pub is_running: bool,
    pub current_stage: String,
    /// Percent complete (0–100).
    pub progress: u8,
    /// Retries performed per operation.
    pub retry_counts: BTreeMap<String, u32>,
    /// Sub-operations that failed without aborting the run.
    pub failed_operations: BTreeSet<String>,
    /// Sticky until `reset()`.
    pub should_interrupt: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupt_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Read-only view for status pollers (UI, CLI).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatusView {
    pub is_running: bool,
    pub current_stage: String,
    pub progress: u8,
    pub failed_operations: Vec<String>,
    pub retry_counts: BTreeMap<String, u32>,
    pub should_interrupt: bool,
}

/// Refusals from lifecycle operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RunStateError {
    #[error("a run is already in progress (stage: {0})")]
    AlreadyRunning(String),

    #[error("previous run finished; reset() is required before starting another")]
    ResetRequired,
}

struct RunInner {
    state: RunState,
    cancel: CancellationToken,
}

/// Cloneable handle to one RunState and its cancellation token.
#[derive(Clone)]
pub struct RunHandle {
    inner: Arc<Mutex<RunInner>>,
}

impl RunHandle {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RunInner {
                state: RunState::default(),
                cancel: CancellationToken::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RunInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the state for a new run. Returns the run's cancellation token.
    pub fn begin(&self) -> Result<CancellationToken, RunStateError> {
        let mut inner = self.lock();
        match inner.state.lifecycle {
            RunLifecycle::Running => Err(RunStateError::AlreadyRunning(
                inner.state.current_stage.clone(),
            )),
            RunLifecycle::Finished => Err(RunStateError::ResetRequired),
            RunLifecycle::Fresh => {
                inner.state.lifecycle = RunLifecycle::Running;
                inner.state.is_running = true;
                inner.state.progress = 0;
                inner.state.started_at = Some(Utc::now());
                info!("Run started");
                Ok(inner.cancel.clone())
            }
        }
    }

    /// Claim the state like [`begin`](Self::begin), returning a guard that
    /// finishes the run when dropped.
    ///
    /// A caller that abandons the run future (timeout, `select!`, aborted
    /// task) still leaves the handle `Finished`, so `reset()` works.
    pub fn claim(&self) -> Result<RunGuard, RunStateError> {
        let token = self.begin()?;
        Ok(RunGuard {
            handle: self.clone(),
            token,
        })
    }

    /// Mark the current run as ended. The interrupt flag is left untouched.
    ///
    /// No-op unless a run is in progress.
    pub fn finish(&self) {
        let mut inner = self.lock();
        if inner.state.lifecycle != RunLifecycle::Running {
            return;
        }
        inner.state.lifecycle = RunLifecycle::Finished;
        inner.state.is_running = false;
        inner.state.finished_at = Some(Utc::now());
        debug!(stage = %inner.state.current_stage, "Run finished");
    }

    /// Clear all state and install a fresh cancellation token.
    ///
    /// Refused while a run is active.
    pub fn reset(&self) -> Result<(), RunStateError> {
        let mut inner = self.lock();
        if inner.state.lifecycle == RunLifecycle::Running {
            return Err(RunStateError::AlreadyRunning(
                inner.state.current_stage.clone(),
            ));
        }
        inner.state = RunState::default();
        inner.cancel = CancellationToken::new();
        debug!("Run state reset");
        Ok(())
    }

    /// Ask the current run to stop at its next cancellation check.
    pub fn request_interrupt(&self, reason: &str) {
        let mut inner = self.lock();
        if !inner.state.should_interrupt {
            warn!(reason, stage = %inner.state.current_stage, "Interrupt requested");
            inner.state.interrupt_reason = Some(reason.to_string());
        }
        inner.state.should_interrupt = true;
        inner.cancel.cancel();
    }

    pub fn should_interrupt(&self) -> bool {
        self.lock().state.should_interrupt
    }

    pub fn interrupt_reason(&self) -> Option<String> {
        self.lock().state.interrupt_reason.clone()
    }

    /// Token for the current (or next) run.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.lock().cancel.clone()
    }

    pub fn set_stage(&self, stage: &str, progress: u8) {
        let mut inner = self.lock();
        inner.state.current_stage = stage.to_string();
        inner.state.progress = progress.min(100);
    }

    /// Record a degraded sub-operation.
    pub fn mark_failed(&self, operation: &str) {
        let mut inner = self.lock();
        if inner.state.failed_operations.insert(operation.to_string()) {
            warn!(operation, "Operation marked failed");
        }
    }

    pub fn record_retry(&self, operation: &str) {
        let mut inner = self.lock();
        *inner
            .state
            .retry_counts
            .entry(operation.to_string())
            .or_insert(0) += 1;
    }

    pub fn retry_count(&self, operation: &str) -> u32 {
        self.lock()
            .state
            .retry_counts
            .get(operation)
            .copied()
            .unwrap_or(0)
    }

    pub fn failed_operations(&self) -> Vec<String> {
        self.lock().state.failed_operations.iter().cloned().collect()
    }

    pub fn is_running(&self) -> bool {
        self.lock().state.is_running
    }

    /// Status view for pollers.
    pub fn get_state(&self) -> RunStatusView {
        let inner = self.lock();
        RunStatusView {
            is_running: inner.state.is_running,
            current_stage: inner.state.current_stage.clone(),
            progress: inner.state.progress,
            failed_operations: inner.state.failed_operations.iter().cloned().collect(),
            retry_counts: inner.state.retry_counts.clone(),
            should_interrupt: inner.state.should_interrupt,
        }
    }

    /// Full copy of the state.
    pub fn snapshot(&self) -> RunState {
        self.lock().state.clone()
    }
}

impl Default for RunHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RunHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("RunHandle")
            .field("lifecycle", &inner.state.lifecycle)
            .field("current_stage", &inner.state.current_stage)
            .field("should_interrupt", &inner.state.should_interrupt)
            .finish()
    }
}

/// A claimed run. Dropping it finishes the run on its handle.
#[derive(Debug)]
pub struct RunGuard {
    handle: RunHandle,
    token: CancellationToken,
}

impl RunGuard {
    /// Cancellation token of the claimed run.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn handle(&self) -> &RunHandle {
        &self.handle
    }

    /// Finish the run now.
    pub fn finish(self) {}
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if self.handle.is_running() {
            debug!("Run guard dropped, finishing run");
        }
        self.handle.finish();
    }
}

impl RetryObserver for RunHandle {
    fn on_retry(&self, operation: &str, _attempt: u32, _delay: Duration) {
        self.record_retry(operation);
    }
}
