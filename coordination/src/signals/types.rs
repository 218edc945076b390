//! Signal types carried by the bus
//!
//! A signal is addressed (direct) or unaddressed (broadcast), typed, and
//! carries an opaque JSON payload. Priority is recorded but never reorders
//! delivery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Unique identifier for signals
pub type SignalId = String;

/// Kind of notification; selects the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    /// An analyst finished its report
    AnalysisComplete,
    /// A debate between opposing roles was requested
    DebateRequest,
    /// A decision-maker needs to act
    DecisionRequired,
    /// Risk threshold crossed or risk assessment degraded
    RiskAlert,
    /// Upstream data changed or arrived
    DataUpdate,
    /// Pause / resume / interrupt style control
    WorkflowControl,
}

impl SignalType {
    pub const ALL: [SignalType; 6] = [
        SignalType::AnalysisComplete,
        SignalType::DebateRequest,
        SignalType::DecisionRequired,
        SignalType::RiskAlert,
        SignalType::DataUpdate,
        SignalType::WorkflowControl,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::AnalysisComplete => "analysis_complete",
            SignalType::DebateRequest => "debate_request",
            SignalType::DecisionRequired => "decision_required",
            SignalType::RiskAlert => "risk_alert",
            SignalType::DataUpdate => "data_update",
            SignalType::WorkflowControl => "workflow_control",
        }
    }
}

impl std::fmt::Display for SignalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata only. Delivery stays FIFO regardless of priority.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SignalPriority {
    Low = 1,
    #[default]
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl std::fmt::Display for SignalPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalPriority::Low => write!(f, "low"),
            SignalPriority::Medium => write!(f, "medium"),
            SignalPriority::High => write!(f, "high"),
            SignalPriority::Critical => write!(f, "critical"),
        }
    }
}

/// A message on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: SignalId,
    pub signal_type: SignalType,
    pub sender: String,
    /// `None` means broadcast.
    pub receiver: Option<String>,
    pub payload: Value,
    pub priority: SignalPriority,
    pub timestamp: DateTime<Utc>,
    pub processed: bool,
    pub response: Option<Value>,
}

impl Signal {
    /// Create a broadcast signal with medium priority.
    pub fn new(signal_type: SignalType, sender: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Self::new_id(),
            signal_type,
            sender: sender.into(),
            receiver: None,
            payload,
            priority: SignalPriority::default(),
            timestamp: Utc::now(),
            processed: false,
            response: None,
        }
    }

    /// Create a signal addressed to one receiver.
    pub fn direct(
        signal_type: SignalType,
        sender: impl Into<String>,
        receiver: impl Into<String>,
        payload: Value,
    ) -> Self {
        let mut signal = Self::new(signal_type, sender, payload);
        signal.receiver = Some(receiver.into());
        signal
    }

    pub fn with_priority(mut self, priority: SignalPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn is_broadcast(&self) -> bool {
        self.receiver.is_none()
    }

    /// Create a new unique signal ID
    pub fn new_id() -> SignalId {
        format!("signal_{}", uuid::Uuid::new_v4())
    }
}

/// Immutable history entry for a processed signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRecord {
    pub signal_id: SignalId,
    pub signal_type: SignalType,
    pub sender: String,
    pub receiver: Option<String>,
    pub priority: SignalPriority,
    pub timestamp: DateTime<Utc>,
    pub processed_at: DateTime<Utc>,
    pub processed: bool,
    pub response: Option<Value>,
}

impl From<&Signal> for SignalRecord {
    fn from(signal: &Signal) -> Self {
        Self {
            signal_id: signal.id.clone(),
            signal_type: signal.signal_type,
            sender: signal.sender.clone(),
            receiver: signal.receiver.clone(),
            priority: signal.priority,
            timestamp: signal.timestamp,
            processed_at: Utc::now(),
            processed: signal.processed,
            response: signal.response.clone(),
        }
    }
}
