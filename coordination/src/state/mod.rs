//! Run state for a single pipeline execution
//!
//! The orchestrator, the retry executor and external status pollers all see
//! the same [`RunState`] through a cloneable [`RunHandle`]. The handle also
//! owns the cancellation token for the current run.
//!
//! # Lifecycle
//!
//! ```text
//! Fresh ──begin()──▶ Running ──finish()──▶ Finished ──reset()──▶ Fresh
//!                       │  (or RunGuard dropped)
//!                       └─ request_interrupt(): flag + token, sticky until reset()
//! ```

pub mod run;

pub use run::{RunGuard, RunHandle, RunLifecycle, RunState, RunStateError, RunStatusView};
