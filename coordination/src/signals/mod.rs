//! Typed publish/subscribe signal bus
//!
//! Decoupled notification between pipeline roles. Delivery is strict FIFO;
//! priority is recorded but never reorders the queue.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐  send()   ┌────────────┐  run()   ┌────────────────┐
//! │ producer │ ────────▶ │ FIFO queue │ ───────▶ │ handler[type]  │
//! └──────────┘     │     └────────────┘          └───────┬────────┘
//!                  ▼                                     ▼
//!           active signals ◀──── remove ──── history (ring buffer)
//!                  │
//!                  └── wait_for_response() polls until the id leaves
//! ```

pub mod bus;
pub mod handlers;
pub mod history;
pub mod types;

pub use bus::{SharedSignalBus, SignalBus, SignalBusConfig, SignalBusError, SignalBusStatus};
pub use handlers::{AcknowledgeHandler, HandlerError, SignalHandler};
pub use history::{SignalHistory, DEFAULT_HISTORY_CAPACITY};
pub use types::{Signal, SignalId, SignalPriority, SignalRecord, SignalType};
