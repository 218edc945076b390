//! Adversarial debate between two roles, settled by an arbiter.
//!
//! ```text
//! round 1..=N:  proponent(material, last opponent) ──▶ opponent(material, proponent)
//! after N:      arbiter(full history, tallies) ──▶ synthesis
//! ```
//!
//! Every call goes through the [`RetryExecutor`](crate::resilience::RetryExecutor).
//! A role that exhausts its retries leaves a placeholder turn; cancellation
//! aborts the debate.

pub mod coordinator;
pub mod prompts;
pub mod state;

pub use coordinator::{DebateContext, DebateCoordinator, DebateError, DebateRoles};
pub use state::{
    count_arguments, required_arguments, DebateOutcome, DebateRound, DebateSide, DebateTotals,
    DegradedTurn, Leaning, MAX_ROUNDS,
};
