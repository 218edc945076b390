//! Tradeflow coordination layer
//!
//! Building blocks shared by the tradeflow analysis pipeline:
//! - [`resilience`]: bounded exponential-backoff retries that separate
//!   cancellation from exhaustion
//! - [`state`]: the per-run state record and its cancellation token
//! - [`gateway`]: the seam through which every role (analyst, researcher,
//!   trader, risk debator, manager) is invoked
//! - [`signals`]: typed publish/subscribe bus with FIFO dispatch and bounded
//!   history
//! - [`debate`]: multi-round proponent/opponent debate plus arbiter synthesis
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use coordination::{RetryExecutor, RetryPolicy, RunHandle};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let run = RunHandle::new();
//! let token = run.begin()?;
//! let executor = RetryExecutor::new(token).with_observer(Arc::new(run.clone()));
//!
//! let policy = RetryPolicy::new(3, Duration::from_secs(1));
//! let quote = executor
//!     .retry_with_backoff("fetch_quote", &policy, || async { Ok::<_, String>(42) })
//!     .await?;
//! assert_eq!(quote, 42);
//! run.finish();
//! # Ok(())
//! # }
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod debate;
pub mod gateway;
pub mod resilience;
pub mod signals;
pub mod state;

pub use debate::{
    DebateContext, DebateCoordinator, DebateError, DebateOutcome, DebateRoles, DebateRound,
    DegradedTurn, Leaning,
};
pub use gateway::{AgentGateway, AgentRequest, GatewayError, SharedGateway};
pub use resilience::{
    RetryError, RetryExecutor, RetryObserver, RetryPolicy, RetryResult, TransientFailure,
};
pub use signals::{
    HandlerError, SharedSignalBus, Signal, SignalBus, SignalBusConfig, SignalBusError,
    SignalBusStatus, SignalHandler, SignalId, SignalPriority, SignalRecord, SignalType,
};
pub use state::{RunGuard, RunHandle, RunLifecycle, RunState, RunStateError, RunStatusView};
