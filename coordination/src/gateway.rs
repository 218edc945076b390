//! Agent Gateway — the narrow seam to the outside world.
//!
//! Every role (analyst, researcher, trader, risk debator, manager) is reached
//! through [`AgentGateway::invoke`]. The gateway owns provider selection and
//! HTTP transport; this crate only sees opaque text or a transient failure.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single role invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRequest {
    /// Role identifier (e.g. `"market_analyst"`, `"bull_researcher"`).
    pub role: String,
    /// Fully rendered prompt text.
    pub prompt: String,
    /// Structured context handed alongside the prompt.
    pub context: Value,
}

impl AgentRequest {
    pub fn new(role: impl Into<String>, prompt: impl Into<String>, context: Value) -> Self {
        Self {
            role: role.into(),
            prompt: prompt.into(),
            context,
        }
    }
}

/// Provider or network failure. Always treated as transient by callers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("agent gateway failure for role '{role}': {message}")]
pub struct GatewayError {
    pub role: String,
    pub message: String,
}

impl GatewayError {
    pub fn new(role: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            message: message.into(),
        }
    }
}

/// External collaborator that turns a prompt into text.
#[async_trait]
pub trait AgentGateway: Send + Sync {
    async fn invoke(&self, request: AgentRequest) -> Result<String, GatewayError>;
}

/// Shared reference to an AgentGateway
pub type SharedGateway = Arc<dyn AgentGateway>;
