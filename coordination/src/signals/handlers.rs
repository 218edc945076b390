//! Signal handlers
//!
//! A handler turns one signal into a JSON response. Errors are recorded on
//! the signal by the bus; they never propagate and are never retried here.

use std::future::Future;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::types::{Signal, SignalType};

/// Dispatch failure recorded as the signal's response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    #[error("No handler found for {0}")]
    NoHandler(SignalType),

    #[error("Handler failed: {0}")]
    Failed(String),

    #[error("Handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    /// Response payload stored on the signal.
    pub fn to_payload(&self) -> Value {
        json!({ "error": self.to_string() })
    }
}

#[async_trait]
pub trait SignalHandler: Send + Sync {
    async fn handle(&self, signal: &Signal) -> Result<Value, HandlerError>;
}

#[async_trait]
impl<F, Fut> SignalHandler for F
where
    F: Fn(Signal) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    async fn handle(&self, signal: &Signal) -> Result<Value, HandlerError> {
        (self)(signal.clone()).await
    }
}

/// Acknowledges every signal type with a status payload.
///
/// Installed by `SignalBus::with_default_handlers`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcknowledgeHandler;

fn field<'a>(payload: &'a Value, key: &str) -> &'a Value {
    payload.get(key).unwrap_or(&Value::Null)
}

fn text(payload: &Value, key: &str) -> String {
    field(payload, key).as_str().unwrap_or_default().to_string()
}

#[async_trait]
impl SignalHandler for AcknowledgeHandler {
    async fn handle(&self, signal: &Signal) -> Result<Value, HandlerError> {
        let p = &signal.payload;
        let response = match signal.signal_type {
            SignalType::AnalysisComplete => {
                let agent_id = text(p, "agent_id");
                info!(agent_id = %agent_id, "Analysis complete");
                json!({
                    "status": "processed",
                    "message": format!("Analysis from {} processed successfully", agent_id),
                })
            }
            SignalType::DebateRequest => {
                let topic = text(p, "topic");
                info!(topic = %topic, requester = %text(p, "requester"), "Debate requested");
                json!({
                    "status": "debate_scheduled",
                    "topic": topic,
                    "participants": field(p, "participants").clone(),
                })
            }
            SignalType::DecisionRequired => {
                let decision_type = text(p, "decision_type");
                info!(decision_type = %decision_type, "Decision required");
                json!({ "status": "decision_pending", "decision_type": decision_type })
            }
            SignalType::RiskAlert => {
                let risk_level = text(p, "risk_level");
                warn!(
                    risk_level = %risk_level,
                    description = %text(p, "description"),
                    "Risk alert"
                );
                json!({
                    "status": "risk_acknowledged",
                    "risk_level": risk_level,
                    "action_taken": "Risk management team notified",
                })
            }
            SignalType::DataUpdate => {
                let data_type = text(p, "data_type");
                info!(data_type = %data_type, "Data update");
                json!({ "status": "data_updated", "data_type": data_type })
            }
            SignalType::WorkflowControl => {
                let action = text(p, "action");
                info!(action = %action, "Workflow control");
                json!({ "status": "workflow_controlled", "action": action })
            }
        };
        Ok(response)
    }
}
